//! Continuous deployment from GitHub webhooks: every pushed branch is kept
//! in its own working copy and deployed with the commands it declares.

pub mod config;
pub mod deploy;
pub mod dispatcher;
pub mod git;
pub mod github;
pub mod hooks;
pub mod http;
pub mod paths;
pub mod runner;
pub mod signature;
#[cfg(test)]
mod test_support;
