pub mod settings;

pub use settings::{BindingConfig, ProviderConfig, Settings};
