mod settings;

pub use settings::{LLMConfig, LoggingConfig, MemoryConfig, ServerConfig, Settings};
