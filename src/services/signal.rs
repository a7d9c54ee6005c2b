//! Coarse signal strength classification for RSSI readings

/// Signal tier, ordered best (`Excellent`) to worst (`Weak`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalTier {
    Excellent = 1,
    Strong = 2,
    Moderate = 3,
    Weak = 4,
}

impl SignalTier {
    /// Classify an RSSI reading. Absent readings are `Weak`.
    pub fn classify(quality: Option<i32>) -> Self {
        match quality {
            Some(q) if q >= -50 => SignalTier::Excellent,
            Some(q) if q >= -60 => SignalTier::Strong,
            Some(q) if q >= -70 => SignalTier::Moderate,
            _ => SignalTier::Weak,
        }
    }

    #[inline]
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalTier::Excellent => "excellent",
            SignalTier::Strong => "strong",
            SignalTier::Moderate => "moderate",
            SignalTier::Weak => "weak",
        }
    }
}

impl std::fmt::Display for SignalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries() {
        assert_eq!(SignalTier::classify(Some(-50)).rank(), 1);
        assert_eq!(SignalTier::classify(Some(-51)).rank(), 2);
        assert_eq!(SignalTier::classify(Some(-60)).rank(), 2);
        assert_eq!(SignalTier::classify(Some(-61)).rank(), 3);
        assert_eq!(SignalTier::classify(Some(-70)).rank(), 3);
        assert_eq!(SignalTier::classify(Some(-71)).rank(), 4);
        assert_eq!(SignalTier::classify(Some(-20)), SignalTier::Excellent);
    }

    #[test]
    fn test_absent_is_weak() {
        assert_eq!(SignalTier::classify(None), SignalTier::Weak);
    }

    proptest! {
        #[test]
        fn tier_never_improves_as_quality_drops(a in -150i32..20, b in -150i32..20) {
            let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
            prop_assert!(SignalTier::classify(Some(hi)).rank() <= SignalTier::classify(Some(lo)).rank());
        }
    }
}
