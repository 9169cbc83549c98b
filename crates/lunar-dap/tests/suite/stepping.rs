use serde_json::json;

use lunar_vm::{MockFrame, MockVm};

use super::harness::*;

fn callee_frame(line: i32) -> MockFrame {
    MockFrame::new("@a.lua", 100, line).named("callee")
}

#[test]
fn step_in_stops_at_the_next_line() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(bare(4, "disconnect"));

    let session = run_session(vm, requests);
    assert_eq!(stopped_reasons(&session.messages), ["entry", "step"]);
}

#[test]
fn step_over_skips_the_callee() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    // The stepped-over call: one line inside the callee, then the return.
    vm.push_call();
    vm.push_line(10, vec![callee_frame(10), main_frame(1)]);
    vm.push_return();
    vm.push_line(2, vec![main_frame(2)]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(bare(4, "next"));
    requests.push(request(5, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(6, "disconnect"));

    let session = run_session(vm, requests);

    // Exactly one stop for the step-over, in the caller, not the callee.
    assert_eq!(stopped_reasons(&session.messages), ["entry", "step", "step"]);
    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    assert_eq!(frames[0]["name"], "main");
    assert_eq!(frames[0]["line"], 2);
}

#[test]
fn step_over_stops_above_the_anchor_after_a_tail_call() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_call();
    vm.push_line(10, vec![callee_frame(10), main_frame(1)]);
    // The anchored frame is gone: the callee returned straight through it.
    vm.push_return();
    vm.push_return();
    vm.push_call();
    vm.push_line(3, vec![main_frame(3)]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(bare(4, "next"));
    requests.push(request(5, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(6, "disconnect"));

    let session = run_session(vm, requests);

    assert_eq!(stopped_reasons(&session.messages), ["entry", "step", "step"]);
    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    assert_eq!(frames[0]["line"], 3);
}

#[test]
fn step_out_lands_after_a_multi_frame_unwind() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    vm.push_call();
    vm.push_line(10, vec![callee_frame(10), main_frame(1)]);
    vm.push_call();
    vm.push_line(20, vec![callee_frame(20), callee_frame(10), main_frame(1)]);
    // stepOut from depth 3; both inner frames unwind before the next line.
    vm.push_return();
    vm.push_return();
    vm.push_line(2, vec![main_frame(2)]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(bare(4, "stepIn"));
    requests.push(bare(5, "stepIn"));
    requests.push(bare(6, "stepOut"));
    requests.push(request(7, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(8, "disconnect"));

    let session = run_session(vm, requests);

    assert_eq!(
        stopped_reasons(&session.messages),
        ["entry", "step", "step", "step", "step"]
    );
    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    assert_eq!(frames[0]["name"], "main");
    assert_eq!(frames[0]["line"], 2);
}

#[test]
fn pause_stops_with_the_pause_reason() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);

    let mut requests = prelude();
    requests.push(bare(3, "pause"));
    requests.push(bare(4, "disconnect"));

    let session = run_session(vm, requests);
    assert_eq!(stopped_reasons(&session.messages), ["entry", "pause"]);
}

#[test]
fn pause_while_running_stops_at_the_next_line() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    vm.push_line(2, vec![main_frame(2)]);

    let session = run_session_with(
        vm,
        vec![
            bare(1, "initialize"),
            request(2, "launch", json!({ "program": "a.lua", "stopOnEntry": false })),
            bare(4, "disconnect"),
        ],
        vec![bare(3, "pause")],
        None,
    );

    assert_eq!(stopped_reasons(&session.messages), ["pause"]);
}

#[test]
fn step_over_ignores_hooks_from_other_coroutines() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    // A coroutine runs a line at the same depth; the anchor names the main
    // state, so it must not satisfy the step.
    vm.push_line_on(2, 7, vec![callee_frame(7), main_frame(1)]);
    vm.push_line(2, vec![main_frame(2)]);

    let mut requests = prelude();
    requests.push(bare(3, "stepIn"));
    requests.push(bare(4, "next"));
    requests.push(request(5, "stackTrace", json!({ "levels": 20 })));
    requests.push(bare(6, "disconnect"));

    let session = run_session(vm, requests);

    assert_eq!(stopped_reasons(&session.messages), ["entry", "step", "step"]);
    let frames = &response(&session.messages, "stackTrace")["body"]["stackFrames"];
    assert_eq!(frames[0]["line"], 2);
}

#[test]
fn breakpoints_still_fire_inside_a_step_over() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    vm.push_call();
    // Stepping over, but the callee line carries a breakpoint.
    vm.push_line(10, vec![callee_frame(10), main_frame(1)]);

    let mut requests = prelude();
    requests.push(request(
        3,
        "setBreakpoints",
        json!({ "source": { "path": "a.lua" }, "breakpoints": [{ "line": 10 }] }),
    ));
    requests.push(bare(4, "stepIn"));
    requests.push(bare(5, "next"));
    requests.push(bare(6, "disconnect"));

    let session = run_session(vm, requests);
    assert_eq!(
        stopped_reasons(&session.messages),
        ["entry", "step", "breakpoint"]
    );
}
