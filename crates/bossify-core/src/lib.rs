pub mod entropy;
pub mod identity;
pub mod template;

pub use entropy::EntropyAssessment;
pub use identity::{Bossification, CommitIdentity};
pub use template::{Node, TemplateError};
