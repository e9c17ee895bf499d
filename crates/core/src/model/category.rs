use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A quiz mode whose stages carry individually scored progress.
///
/// Stage counts and per-stage maxima are fixed properties of the mode, not
/// configuration: validation and percentage breakdowns both derive from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Roadmap,
    TimeTrial,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Roadmap, Category::TimeTrial];

    /// Number of stages in this category; stage indexes run `1..=stage_count`.
    #[must_use]
    pub fn stage_count(self) -> u8 {
        match self {
            Category::Roadmap => 15,
            Category::TimeTrial => 30,
        }
    }

    /// Highest score a single stage can hold.
    #[must_use]
    pub fn max_stage_score(self) -> u32 {
        match self {
            Category::Roadmap => 20,
            Category::TimeTrial => 10,
        }
    }

    /// Highest total the whole category can sum to.
    #[must_use]
    pub fn max_total_score(self) -> u32 {
        u32::from(self.stage_count()) * self.max_stage_score()
    }

    /// Prefix used for this category's stage fields on the wire,
    /// e.g. `RoadmapStage3`.
    #[must_use]
    pub fn wire_prefix(self) -> &'static str {
        match self {
            Category::Roadmap => "RoadmapStage",
            Category::TimeTrial => "TimeTrialStage",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Roadmap => "Roadmap",
            Category::TimeTrial => "TimeTrial",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing a `Category` from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCategoryError {
    raw: String,
}

impl fmt::Display for ParseCategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown category: {}", self.raw)
    }
}

impl std::error::Error for ParseCategoryError {}

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Roadmap" | "roadmap" => Ok(Category::Roadmap),
            "TimeTrial" | "timetrial" | "time-trial" => Ok(Category::TimeTrial),
            _ => Err(ParseCategoryError { raw: s.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_limits_are_fixed() {
        assert_eq!(Category::Roadmap.stage_count(), 15);
        assert_eq!(Category::Roadmap.max_stage_score(), 20);
        assert_eq!(Category::Roadmap.max_total_score(), 300);

        assert_eq!(Category::TimeTrial.stage_count(), 30);
        assert_eq!(Category::TimeTrial.max_stage_score(), 10);
        assert_eq!(Category::TimeTrial.max_total_score(), 300);
    }

    #[test]
    fn category_display_roundtrip() {
        for category in Category::ALL {
            let parsed: Category = category.to_string().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn category_parses_cli_spellings() {
        assert_eq!("roadmap".parse::<Category>().unwrap(), Category::Roadmap);
        assert_eq!(
            "time-trial".parse::<Category>().unwrap(),
            Category::TimeTrial
        );
        assert!("Freestyle".parse::<Category>().is_err());
    }
}
