//! Declarative rule registration.
//!
//! Bindings are looked up by variable name, with a leading underscore
//! stripped (`_x` reads the capture named `"x"`). Every binding is an
//! `&Arc<UOp>`; the body returns `Option<Arc<UOp>>` and may use `?`.
//!
//! ```ignore
//! let mut pm = PatternMatcher::new();
//! pattern!(pm, UPat::var("x") + 0 => |x| Some(x.clone()));
//! pattern!(pm, UPat::op(OpTag::DefineAcc).named("acc") => |acc; ctx| rename(acc, ctx));
//! ```

/// Register a rewrite rule on a [`PatternMatcher`](crate::pattern::PatternMatcher).
///
/// `|a, b| body` binds captures; `|a, b; ctx| body` also binds the pass
/// context as `&mut C`.
#[macro_export]
macro_rules! pattern {
    ($pm:ident, $pattern:expr => |$($var:ident),* ; $ctx:ident| $body:expr) => {
        $pm.add($pattern, move |bindings: &$crate::pattern::Bindings, $ctx| {
            $(
                let $var = bindings.get(stringify!($var).trim_start_matches('_'))?;
            )*
            $body
        });
    };

    ($pm:ident, $pattern:expr => |$($var:ident),* $(,)?| $body:expr) => {
        $pm.add($pattern, move |bindings: &$crate::pattern::Bindings, _ctx| {
            $(
                let $var = bindings.get(stringify!($var).trim_start_matches('_'))?;
            )*
            $body
        });
    };
}
