pub mod config;
pub mod db;
pub mod gitlab;
pub mod handlers;
pub mod jobs;
pub mod logger;
pub mod telegram;

#[cfg(test)]
mod tests;
