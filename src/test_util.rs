//! Test doubles for the layers a [crate::node::Node] is built on. They record every interaction
//!  for later inspection, and they are exported so that code built on this crate can use them
//!  in its own tests.

pub mod layers;
pub mod node;
