mod cli;
mod demo;
mod infra;
mod routes;
mod server;

use status_rules::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
