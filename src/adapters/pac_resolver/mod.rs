mod pac_evaluator;
mod resolver;

pub use pac_evaluator::{evaluate_pac, pac_visible_url};
pub use resolver::PacProxyResolver;
