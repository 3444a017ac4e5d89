//! Confirms the ambient logging story is actually wired up, not just
//! declared in the dependency table.

#[test]
fn init_tracing_installs_a_subscriber_and_accepts_a_log_line() {
    agentcore_core::init_tracing();
    tracing::info!(target: "agentcore_core::tests::logging", "subscriber installed");
}
