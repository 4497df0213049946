use broadcaster::Broadcaster;
use std::sync::Arc;
use task_service::TaskService;

pub struct AppState {
    pub service: TaskService,
    pub broadcaster: Arc<Broadcaster>,
    pub max_digits: u32,
}
