#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod backend;
pub mod bootcommand;
pub mod cli;
pub mod config;
pub mod discover;
pub mod error;
pub mod flow;
pub mod logging;
pub mod network;
pub mod observer;
pub mod paths;
pub mod phase;
pub mod process;
pub mod vnc;
pub mod wait;
