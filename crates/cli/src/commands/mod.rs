pub mod capabilities;
pub mod config;
pub mod query;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

impl CommandResult {
    pub fn failure(command: &str, error_class: &str, message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            output: format!("{command} failed ({error_class}): {}", message.into()),
        }
    }
}
