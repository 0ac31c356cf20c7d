//! Zone invariants under random opt sequences.

use proptest::prelude::*;

use crate::optimizer::{AxisKind, Kernel, Opt, Renderer};
use crate::test::helpers::*;

fn arb_opt() -> impl Strategy<Value = Opt> {
    prop_oneof![
        (0usize..3, prop::sample::select(vec![2usize, 4, 8])).prop_map(|(a, n)| Opt::upcast(a, n)),
        (0usize..3, prop::sample::select(vec![2usize, 4, 8, 16])).prop_map(|(a, n)| Opt::local(a, n)),
        (0usize..2, prop::sample::select(vec![2usize, 4, 8])).prop_map(|(a, n)| Opt::unroll(a, n)),
        (0usize..2, prop::sample::select(vec![4usize, 8, 16])).prop_map(|(a, n)| Opt::grouptop(a, n)),
    ]
}

fn check_zones(k: &Kernel) -> Result<(), TestCaseError> {
    let colors = k.colors();
    prop_assert_eq!(colors.len(), k.shape_len());
    prop_assert!(k.global_dims() + k.local_dims <= k.first_reduce());
    prop_assert!(k.first_reduce() <= k.first_upcast());
    prop_assert!(k.full_shape().iter().all(|&s| s > 1), "size-1 axis left in {:?}", k.full_shape());
    // zones appear in order
    let rank = |c: &AxisKind| match c {
        AxisKind::Global | AxisKind::GlobalNoLocals => 0,
        AxisKind::Local => 1,
        AxisKind::Group | AxisKind::GroupUpcastMid => 2,
        AxisKind::Reduce => 3,
        AxisKind::Unroll | AxisKind::Upcast => 4,
    };
    prop_assert!(colors.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])), "{:?}", colors);
    for st in &k.sts {
        prop_assert_eq!(st.ndim(), k.shape_len());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn opts_keep_zones_ordered(opts in prop::collection::vec(arb_opt(), 0..5)) {
        let mut k = kernel(row_sum(32, 64), Renderer::gpu());
        let elements: usize = k.full_shape().iter().product();
        for opt in opts {
            let before = k.clone();
            match k.apply_opt(opt, true) {
                Ok(()) => {
                    check_zones(&k)?;
                    prop_assert_eq!(k.full_shape().iter().product::<usize>(), elements);
                }
                Err(_) => {
                    prop_assert_eq!(&k.sts, &before.sts);
                    prop_assert_eq!(k.applied_opts.len(), before.applied_opts.len());
                }
            }
        }
    }

    #[test]
    fn applied_opts_replay(opts in prop::collection::vec(arb_opt(), 0..5)) {
        let mut k = kernel(row_sum(32, 64), Renderer::gpu());
        for opt in opts {
            let _ = k.apply_opt(opt, true);
        }
        let replayed = crate::optimizer::replay_opts(kernel(row_sum(32, 64), Renderer::gpu()), &k.applied_opts);
        prop_assert!(replayed.is_ok());
        let replayed = replayed.unwrap();
        prop_assert_eq!(replayed.sts, k.sts);
    }
}
