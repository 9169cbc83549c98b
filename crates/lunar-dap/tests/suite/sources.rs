use std::sync::{Arc, Mutex};

use serde_json::json;

use lunar_dap::{ChunkResolution, ChunkResolver};
use lunar_vm::{MockFrame, MockVm};

use super::harness::*;

const CHUNK_TEXT: &str = "local x = 1\nreturn x";

struct CountingResolver {
    result: ChunkResolution,
    calls: Arc<Mutex<usize>>,
}

impl ChunkResolver for CountingResolver {
    fn resolve(&mut self, _name: &str) -> ChunkResolution {
        *self.calls.lock().unwrap() += 1;
        self.result.clone()
    }
}

#[test]
fn anonymous_chunks_get_a_synthetic_source_reference() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![MockFrame::new(CHUNK_TEXT, 0xABCDEF, 1).named("chunk")]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "stackTrace", json!({ "levels": 20 })));
    requests.push(request(5, "source", json!({ "sourceReference": 0xABCDEF })));
    requests.push(bare(6, "disconnect"));

    let session = run_session(vm, requests);

    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    let source = &frames[0]["source"];
    assert_eq!(source["sourceReference"], 0xABCDEF);
    assert!(source.get("path").is_none());

    // The reference maps back to the chunk's own text.
    assert_eq!(response(&session.messages, "source")["body"]["content"], CHUNK_TEXT);
}

#[test]
fn synthetic_references_are_clamped_to_53_bits() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![MockFrame::new(CHUNK_TEXT, u64::MAX, 1)]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(5, "disconnect"));

    let session = run_session(vm, requests);

    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    let reference = frames[0]["source"]["sourceReference"].as_i64().unwrap();
    assert!(reference > 0);
    assert!(reference <= (1 << 53) - 1);
}

#[test]
fn breakpoints_never_fire_in_anonymous_chunks() {
    let mut vm = MockVm::new();
    vm.push_call();
    // Line 1 executes in an anonymous chunk; a breakpoint exists on line 1
    // of a real file.
    vm.push_line(1, vec![MockFrame::new(CHUNK_TEXT, 0xABCDEF, 1)]);
    vm.push_finished();

    let mut requests = prelude();
    requests.push(request(
        3,
        "setBreakpoints",
        json!({ "source": { "path": "a.lua" }, "breakpoints": [{ "line": 1 }] }),
    ));
    requests.push(bare(4, "continue"));

    let session = run_session(vm, requests);
    assert_eq!(stopped_reasons(&session.messages), ["entry"]);
}

#[test]
fn native_frames_are_marked_opaque() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(
        5,
        vec![
            main_frame(5),
            MockFrame::new("=[C]", 0, -1).named("print"),
        ],
    );

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(5, "disconnect"));

    let session = run_session(vm, requests);

    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    assert_eq!(frames[1]["source"]["name"], "<C function>");
    assert_eq!(frames[1]["source"]["sourceReference"], -1);
    assert!(frames[1]["source"].get("path").is_none());
}

#[test]
fn file_frames_carry_completed_display_paths() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(3, vec![MockFrame::new("@scripts/a.lua", 1, 3).named("main")]);

    let mut requests = vec![
        bare(1, "initialize"),
        request(
            2,
            "launch",
            json!({ "program": "scripts/a.lua", "cwd": "/proj", "stopOnEntry": true }),
        ),
    ];
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(5, "disconnect"));

    let session = run_session(vm, requests);

    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    let source = &frames[0]["source"];
    assert_eq!(source["name"], "a.lua");
    assert_eq!(source["path"], "/proj/scripts/a.lua");
    assert_eq!(source["sourceReference"], 0);
}

#[test]
fn cached_chunk_resolutions_survive_later_renders() {
    let calls = Arc::new(Mutex::new(0));
    let resolver = CountingResolver {
        result: ChunkResolution::Cached("src/gen.lua".to_string()),
        calls: calls.clone(),
    };

    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(2, vec![MockFrame::new("=gen", 1, 2).named("gen")]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "stackTrace", json!({ "levels": 20 })));
    requests.push(request(5, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(6, "disconnect"));

    let session = run_session_with(vm, requests, Vec::new(), Some(Box::new(resolver)));

    let traces = responses(&session.messages, "stackTrace");
    for trace in &traces {
        assert_eq!(trace["body"]["stackFrames"][0]["source"]["path"], "src/gen.lua");
    }
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn once_resolutions_expire_with_their_render() {
    let calls = Arc::new(Mutex::new(0));
    let resolver = CountingResolver {
        result: ChunkResolution::Once("src/gen.lua".to_string()),
        calls: calls.clone(),
    };

    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(2, vec![MockFrame::new("=gen", 1, 2).named("gen")]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "stackTrace", json!({ "levels": 20 })));
    requests.push(request(5, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(6, "disconnect"));

    let session = run_session_with(vm, requests, Vec::new(), Some(Box::new(resolver)));

    assert_eq!(*calls.lock().unwrap(), 2);
}

#[test]
fn unresolved_chunks_render_without_a_source() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(2, vec![MockFrame::new("=gen", 1, 2).named("gen")]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(5, "disconnect"));

    let session = run_session(vm, requests);

    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    assert_eq!(frames[0]["line"], 2);
    assert!(frames[0].get("source").is_none());
}

#[test]
fn unknown_source_references_report_unavailable() {
    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(request(4, "source", json!({ "sourceReference": 777 })));
    requests.push(bare(5, "disconnect"));

    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);

    let session = run_session(vm, requests);
    assert_eq!(
        response(&session.messages, "source")["body"]["content"],
        "Source not available"
    );
}
