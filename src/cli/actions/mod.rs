pub mod server;

use crate::api::config::AppConfig;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        config: AppConfig,
    },
}
