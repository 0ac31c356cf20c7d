pub mod ast;
pub mod bounds;
pub mod const_cast;
pub mod eval;
pub mod matcher;
pub mod rewrite;
