use kernc_dtype::DType;
use proptest::prelude::*;

use super::generators::int32_operand;
use crate::op::Op;
use crate::types::{BinaryOp, ConstValue};
use crate::uop::{exec_alu, threefry2x32};

fn int32(op: BinaryOp, a: i64, b: i64) -> Option<ConstValue> {
    exec_alu(&Op::Binary(op), &DType::Int32, &[ConstValue::Int(a), ConstValue::Int(b)])
}

proptest! {
    #[test]
    fn commutative_ops_commute(a in int32_operand(), b in int32_operand()) {
        for op in [BinaryOp::Add, BinaryOp::Mul, BinaryOp::Max, BinaryOp::Xor, BinaryOp::And, BinaryOp::Or] {
            prop_assert_eq!(int32(op, a, b), int32(op, b, a));
        }
    }

    #[test]
    fn results_stay_in_int32(a in int32_operand(), b in int32_operand()) {
        for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul] {
            let r = int32(op, a, b).and_then(|v| v.as_i64());
            prop_assert!(r.is_some_and(|v| (i32::MIN as i64..=i32::MAX as i64).contains(&v)));
        }
    }

    #[test]
    fn division_identity(a in int32_operand(), b in int32_operand()) {
        prop_assume!(b != 0 && !(a == i32::MIN as i64 && b == -1));
        let q = int32(BinaryOp::Idiv, a, b).and_then(|v| v.as_i64());
        let r = int32(BinaryOp::Mod, a, b).and_then(|v| v.as_i64());
        prop_assert_eq!(q.zip(r).map(|(q, r)| q * b + r), Some(a));
    }

    #[test]
    fn threefry_is_a_permutation_per_seed(x in any::<u64>(), y in any::<u64>(), seed in any::<u64>()) {
        prop_assume!(x != y);
        prop_assert_ne!(threefry2x32(x, seed), threefry2x32(y, seed));
    }
}
