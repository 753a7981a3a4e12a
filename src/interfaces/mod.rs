/// Interfaces Layer - External Entry Points
///
/// This layer contains the external interfaces to the system.
///
/// ## Modules
/// - `cli`: Command-line simulator (main.rs logic)
/// - `bootstrap`: launches and wires both domains from a setup

pub mod bootstrap;
pub mod cli;

pub use bootstrap::{LaunchOptions, Network};
