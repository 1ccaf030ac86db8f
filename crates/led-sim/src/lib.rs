//! LED Controller Simulation Library
//!
//! This crate provides virtual controller boards for exercising the
//! transport, multiplexer and manager without physical hardware:
//!
//! - **VirtualController**: applies `led`/`status` commands to simulated
//!   channels and produces the events and snapshots real firmware would
//! - **run_virtual_controller**: drives a `VirtualController` over any
//!   async byte stream, typically one end of `tokio::io::duplex`
//!
//! # Example
//!
//! ```rust
//! use led_sim::VirtualController;
//!
//! let mut board = VirtualController::new("board-a", 2);
//! board.process_line(r#"{"cm":"led","a":"on","drvs":[{"drv":0,"cs":[200,-1,-1,-1]}]}"#);
//!
//! assert_eq!(board.channel(0, 0).pwm, 200);
//! while let Some(line) = board.take_output() {
//!     println!("board says: {line}");
//! }
//! ```

pub mod controller;
pub mod task;

pub use controller::{ChannelState, VirtualController, VirtualControllerConfig};
pub use task::{run_virtual_controller, VirtualControllerCommand};
