pub mod params;
pub mod rewriter;

pub use params::ParamValue;
pub use params::attribute_literal;
pub use params::substitute_params;
pub use rewriter::MAX_LIMIT;
pub use rewriter::MAX_OFFSET;
pub use rewriter::RewrittenQuery;
pub use rewriter::StatementKind;
pub use rewriter::is_simple_select;
pub use rewriter::rewrite;
pub use rewriter::table_name;
