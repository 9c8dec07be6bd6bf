pub mod openai;
pub mod util;

pub use openai::{Completion, Embedding, OpenAi, Usage};
