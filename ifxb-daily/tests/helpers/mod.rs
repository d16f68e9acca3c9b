//! Test helpers for ifxb-daily integration tests
//!
//! - Fakes: scripted remote session, local process runner and notifier
//! - WebhookServer: in-process axum endpoint standing in for the chat robot

#![allow(dead_code)]

pub mod fakes;
pub mod webhook_server;

pub use fakes::{FakeConnector, Recorder, RecordingNotifier, ScriptedRunner};
pub use webhook_server::WebhookServer;
