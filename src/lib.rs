//! Round coordination for a multiplayer word game played over a shared store.
//!
//! One participant is the host and owns every canonical write; everybody else
//! follows what the store shows. See [`services::sync::RoundDriver`] for the
//! entry point.

pub mod clients;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
