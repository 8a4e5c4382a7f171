pub mod spec;
pub mod unet;
pub mod state_dict;

pub use spec::UNetSpec;
pub use unet::UNet;
pub use state_dict::{load_weights, save_weights, StateDict};
