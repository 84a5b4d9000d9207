//! rosforge CLI - build and publish the ROS image tier chain.

pub mod commands;
pub mod output;
