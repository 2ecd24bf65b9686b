mod ami;
mod instance;
mod sg;

pub use ami::AmiArgs;
pub use instance::InstanceArgs;
pub use sg::{DefaultSgArgs, SgArgs, SgRulesArgs};
