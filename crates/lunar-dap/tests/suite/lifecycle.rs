use serde_json::json;

use lunar_dap::DebuggerState;
use lunar_vm::MockVm;

use super::harness::*;

#[test]
fn cold_start_with_stop_on_entry_emits_the_full_sequence() {
    let vm = MockVm::new();
    let mut requests = prelude();
    requests.push(bare(3, "continue"));

    let session = run_session(vm, requests);

    assert_eq!(
        kinds(&session.messages),
        [
            "response:initialize",
            "event:initialized",
            "event:output",
            "response:launch",
            "event:thread",
            "event:stopped",
            "response:continue",
            "event:terminated",
        ]
    );
    assert_eq!(stopped_reasons(&session.messages), ["entry"]);
    assert_eq!(outputs(&session.messages), ["Debugger initialized\n"]);
    assert_eq!(session.messages[4]["body"]["reason"], "started");
    assert_eq!(session.opened, 1);
    assert_eq!(session.closed, 1);
    assert_eq!(session.state, DebuggerState::Terminated);
    assert_eq!(
        session.adapter.vm().loaded,
        [std::path::PathBuf::from("a.lua")]
    );
}

#[test]
fn initialize_reports_capabilities() {
    let session = run_session(MockVm::new(), vec![bare(1, "initialize")]);
    let capabilities = &response(&session.messages, "initialize")["body"];
    assert_eq!(capabilities["supportsConditionalBreakpoints"], true);
    assert_eq!(capabilities["supportsConfigurationDoneRequest"], true);
    assert_eq!(capabilities["supportsSetVariable"], true);
}

#[test]
fn attach_observes_without_loading_a_program() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);

    let session = run_session(
        vm,
        vec![
            bare(1, "initialize"),
            request(2, "attach", json!({ "program": "a.lua", "stopOnEntry": true })),
            bare(3, "continue"),
        ],
    );

    assert!(session.adapter.vm().loaded.is_empty());
    assert_eq!(stopped_reasons(&session.messages), ["entry"]);
    assert_eq!(session.state, DebuggerState::Terminated);
}

#[test]
fn launch_without_stop_on_entry_goes_straight_to_running() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    vm.push_finished();

    let session = run_session(
        vm,
        vec![
            bare(1, "initialize"),
            request(2, "launch", json!({ "program": "a.lua", "stopOnEntry": false })),
        ],
    );

    assert!(stopped_reasons(&session.messages).is_empty());
    assert_eq!(session.state, DebuggerState::Terminated);
}

#[test]
fn launch_before_initialize_is_rejected() {
    let session = run_session(
        MockVm::new(),
        vec![request(1, "launch", json!({ "program": "a.lua" }))],
    );

    let launch = response(&session.messages, "launch");
    assert_eq!(launch["success"], false);
    assert_eq!(launch["message"], "not initialized or unexpected state");
}

#[test]
fn launch_without_a_program_fails_and_preserves_state() {
    let session = run_session(
        MockVm::new(),
        vec![
            bare(1, "initialize"),
            request(2, "launch", json!({ "stopOnEntry": true })),
        ],
    );

    let launch = response(&session.messages, "launch");
    assert_eq!(launch["success"], false);
    assert_eq!(launch["message"], "Launch failed");
    assert_eq!(session.state, DebuggerState::Initialized);
    assert!(session.adapter.vm().loaded.is_empty());
}

#[test]
fn load_failure_reports_the_vm_error_on_console() {
    let mut vm = MockVm::new();
    vm.fail_next_load("a.lua:1: unexpected symbol near '('");

    let session = run_session(
        vm,
        vec![
            bare(1, "initialize"),
            request(2, "launch", json!({ "program": "a.lua" })),
        ],
    );

    let launch = response(&session.messages, "launch");
    assert_eq!(launch["success"], false);
    assert_eq!(launch["message"], "Launch failed");

    let outputs = outputs(&session.messages);
    assert!(outputs
        .iter()
        .any(|o| o.starts_with("Failed to launch a.lua due to error: a.lua:1: unexpected symbol")));
    assert_eq!(session.state, DebuggerState::Initialized);
}

#[test]
fn faulted_script_reports_the_error_then_terminates() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    vm.push_faulted("a.lua:1: attempt to call a nil value");

    let session = run_session(
        vm,
        vec![
            bare(1, "initialize"),
            request(2, "launch", json!({ "program": "a.lua", "stopOnEntry": false })),
        ],
    );

    let tags = kinds(&session.messages);
    let output_at = tags.iter().rposition(|t| t == "event:output").unwrap();
    let terminated_at = tags.iter().position(|t| t == "event:terminated").unwrap();
    assert!(output_at < terminated_at);
    assert!(outputs(&session.messages)
        .iter()
        .any(|o| o == "Program terminated with error: a.lua:1: attempt to call a nil value\n"));
    assert_eq!(session.state, DebuggerState::Terminated);
}

#[test]
fn disconnect_while_running_detaches_without_stopping_the_vm() {
    let mut vm = MockVm::new();
    vm.push_call();
    vm.push_line(1, vec![main_frame(1)]);
    vm.push_line(2, vec![main_frame(2)]);
    vm.push_finished();

    let session = run_session_with(
        vm,
        vec![
            bare(1, "initialize"),
            request(2, "launch", json!({ "program": "a.lua", "stopOnEntry": false })),
        ],
        vec![bare(3, "disconnect")],
        None,
    );

    let disconnect = response(&session.messages, "disconnect");
    assert_eq!(disconnect["success"], true);
    assert!(stopped_reasons(&session.messages).is_empty());
    assert_eq!(
        session.messages.iter().filter(|m| m["event"] == "terminated").count(),
        1
    );
    assert_eq!(session.closed, 1);
    assert_eq!(session.state, DebuggerState::Terminated);
}

#[test]
fn configuration_done_is_acknowledged_after_initialize() {
    let session = run_session(
        MockVm::new(),
        vec![bare(1, "initialize"), bare(2, "configurationDone")],
    );
    assert_eq!(response(&session.messages, "configurationDone")["success"], true);
}

#[test]
fn threads_reports_the_single_vm_thread_while_stopped() {
    let mut requests = prelude();
    requests.push(bare(3, "threads"));
    requests.push(bare(4, "continue"));

    let session = run_session(MockVm::new(), requests);
    let threads = &response(&session.messages, "threads")["body"]["threads"];
    assert_eq!(threads[0]["id"], 1);
    assert_eq!(threads[0]["name"], "Main Thread");
}

#[test]
fn threads_outside_a_stop_is_rejected() {
    let session = run_session(MockVm::new(), vec![bare(1, "initialize"), bare(2, "threads")]);
    let threads = response(&session.messages, "threads");
    assert_eq!(threads["success"], false);
    assert_eq!(threads["message"], "not initialized or unexpected state");
}

#[test]
fn cwd_updates_the_working_directory_for_program_resolution() {
    let session = run_session(
        MockVm::new(),
        vec![
            bare(1, "initialize"),
            request(
                2,
                "launch",
                json!({ "program": "a.lua", "cwd": "/home/user/proj", "stopOnEntry": true }),
            ),
            bare(3, "continue"),
        ],
    );

    assert_eq!(
        session.adapter.vm().loaded,
        [std::path::PathBuf::from("/home/user/proj/a.lua")]
    );
}

#[test]
fn package_paths_are_forwarded_independently() {
    let session = run_session(
        MockVm::new(),
        vec![
            bare(1, "initialize"),
            request(
                2,
                "launch",
                json!({ "program": "a.lua", "path": "./?.lua", "stopOnEntry": false }),
            ),
        ],
    );

    // `path` takes effect without a `cpath` alongside it.
    assert_eq!(session.adapter.vm().package_path.as_deref(), Some("./?.lua"));
    assert!(session.adapter.vm().package_cpath.is_none());
}
