use engine_runtime::orchestrator::SyncOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SyncOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self { orchestrator }
    }
}
