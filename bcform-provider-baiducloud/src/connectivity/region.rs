use std::fmt;
use std::str::FromStr;

/// BCE region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Region {
    #[default]
    BeiJing,
    GuangZhou,
    SuZhou,
    ShangHai,
    WuHan,
    BaoDing,
    HongKong,
    Singapore,
}

impl Region {
    pub const ALL: [Region; 8] = [
        Region::BeiJing,
        Region::GuangZhou,
        Region::SuZhou,
        Region::ShangHai,
        Region::WuHan,
        Region::BaoDing,
        Region::HongKong,
        Region::Singapore,
    ];

    /// Short code used in endpoints (e.g., "bj")
    pub fn code(&self) -> &'static str {
        match self {
            Region::BeiJing => "bj",
            Region::GuangZhou => "gz",
            Region::SuZhou => "su",
            Region::ShangHai => "fsh",
            Region::WuHan => "fwh",
            Region::BaoDing => "bd",
            Region::HongKong => "hkg",
            Region::Singapore => "sin",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|r| r.code() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Region::ALL.iter().map(Region::code).collect();
                format!("Unknown region '{}', expected one of: {}", s, valid.join(", "))
            })
    }
}
