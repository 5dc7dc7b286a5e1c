mod args;

pub use args::{CapsArgs, Cli, Commands, IdentityArgs, ResolveArgs, StatArgs};
