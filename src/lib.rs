//! linkwatch - reachability monitoring for branch and ATM network links.
//!
//! Probes each endpoint address with ICMP echo, classifies the outcome
//! against the thresholds of its network media, keeps an append-only
//! history and summarizes it into rolling health figures.

pub mod classify;
pub mod config;
pub mod db;
pub mod health;
pub mod monitor;
pub mod probe;
pub mod profile;
pub mod web;
