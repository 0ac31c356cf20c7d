use crate::optimizer::{HeuristicsConfig, OptimizerConfig, SearchConfig, TcOpt, TcUsage};

#[test]
fn builders_match_defaults() {
    assert_eq!(HeuristicsConfig::builder().build(), HeuristicsConfig::default());
    assert_eq!(SearchConfig::builder().build(), SearchConfig::default());
    assert_eq!(OptimizerConfig::builder().build(), OptimizerConfig::default());
}

#[test]
fn levels_round_trip() {
    for level in 0..3 {
        assert_eq!(TcUsage::from_level(level).as_usize(), level);
        assert_eq!(TcOpt::from_level(level).as_usize(), level);
    }
}
