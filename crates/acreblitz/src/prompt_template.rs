use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

/// The agent's system prompt, rendered with the list of loaded systems
pub const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}
