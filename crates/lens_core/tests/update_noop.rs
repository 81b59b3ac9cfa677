use lens_core::{update, JobStatus, Msg, PollerState, StatusReply};

#[test]
fn completions_while_idle_are_noops() {
    let state = PollerState::default();

    for msg in [
        Msg::StatusReceived {
            generation: 0,
            reply: Ok(StatusReply::new(JobStatus::Completed)),
        },
        Msg::DeadlineElapsed { generation: 0 },
        Msg::CancelRequested,
    ] {
        let (next, effects) = update(state.clone(), msg);
        assert_eq!(state, next);
        assert!(effects.is_empty());
    }
}
