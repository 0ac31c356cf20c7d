//! Constant folding agrees with direct evaluation.

use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::graph_rewrite;
use proptest::prelude::*;

use crate::symbolic::constant_folder;
use crate::test::helpers::opaque;

#[derive(Debug, Clone)]
enum Expr {
    Lit(i32),
    /// A value the folder can't see through.
    Opaque(u8),
    Bin(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self) -> i32 {
        match self {
            Expr::Lit(v) => *v,
            Expr::Opaque(_) => unreachable!("opaque leaves have no value"),
            Expr::Bin(op, a, b) => {
                let (a, b) = (a.eval(), b.eval());
                match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    _ => a.max(b),
                }
            }
        }
    }

    fn build(&self) -> Arc<UOp> {
        match self {
            Expr::Lit(v) => UOp::const_(DType::Int32, *v as i64),
            Expr::Opaque(i) => opaque(*i as i64),
            Expr::Bin(op, a, b) => a.build().alu(*op, b.build()),
        }
    }
}

fn arb_tree(leaf: BoxedStrategy<Expr>) -> impl Strategy<Value = Expr> {
    leaf.prop_recursive(4, 24, 2, |inner| {
        (prop::sample::select(vec![BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Max]), inner.clone(), inner)
            .prop_map(|(op, a, b)| Expr::Bin(op, Box::new(a), Box::new(b)))
    })
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    arb_tree((-20i32..20).prop_map(Expr::Lit).boxed())
}

/// Trees mixing constants with loads.
fn arb_mixed_expr() -> impl Strategy<Value = Expr> {
    arb_tree(prop_oneof![(-20i32..20).prop_map(Expr::Lit), (0u8..3).prop_map(Expr::Opaque)].boxed())
}

fn fold(u: &Arc<UOp>) -> Arc<UOp> {
    let pm: PatternMatcher = constant_folder();
    graph_rewrite(&pm, u, &mut ())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn constant_trees_fold_to_their_value(expr in arb_expr()) {
        let out = fold(&expr.build());
        let value = out.const_value().and_then(|c| c.as_i64());
        prop_assert_eq!(value, Some(expr.eval() as i64), "{:?} folded to {:?}", expr, out.op());
        prop_assert_eq!(out.dtype(), DType::Int32);
    }

    #[test]
    fn folding_reaches_a_fixpoint(expr in arb_mixed_expr()) {
        let once = fold(&expr.build());
        let twice = fold(&once);
        prop_assert_eq!(twice.id, once.id, "{:?} folded to {:?}", expr, once.op());
    }

    #[test]
    fn adding_zero_keeps_the_node(c in -1000i64..1000) {
        let x = opaque(c);
        prop_assert_eq!(fold(&x.add(0i64)).id, x.id);
        prop_assert_eq!(fold(&x.mul(1i64)).id, x.id);
    }

    #[test]
    fn nested_constant_adds_merge(c1 in -1000i64..1000, c2 in -1000i64..1000) {
        prop_assume!(c1 + c2 != 0);
        let x = opaque(0);
        let out = fold(&x.add(c1).add(c2));
        prop_assert_eq!(out.tag(), OpTag::Binary);
        prop_assert_eq!(out.src()[0].id, x.id);
        prop_assert_eq!(out.src()[1].const_value().and_then(|c| c.as_i64()), Some(c1 + c2));
    }
}
