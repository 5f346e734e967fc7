pub mod agent;
pub mod cache;
pub mod compact;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod prompt_template;
pub mod providers;
pub mod resolver;
pub mod retry;
pub mod sanitize;
pub mod systems;
pub mod token_counter;
pub mod weather;
