// Export route modules
pub mod health;
pub mod reply;
pub mod weather;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(reply::routes(state.clone()))
        .merge(weather::routes(state))
}
