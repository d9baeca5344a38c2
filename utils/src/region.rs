use std::str::FromStr;

use anyhow::Context;
use regex::Regex;

/// Genomic region of the form `contig`, `contig:start-end`, `contig:-end` or `contig:start-`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    contig: String,
    start: Option<usize>,
    end: Option<usize>,
}

impl Region {
    pub fn contig(&self) -> &str {
        &self.contig
    }
    pub fn start(&self) -> Option<usize> {
        self.start
    }
    pub fn end(&self) -> Option<usize> {
        self.end
    }
}

fn parse_usize_with_commas(s: &str) -> anyhow::Result<Option<usize>> {
    if s.is_empty() {
        Ok(None)
    } else {
        s.replace(',', "")
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("Error parsing coordinate {}", s))
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let r = Regex::new(r"^(\S+?)(?::([0-9,]*)-([0-9,]*))?$")?;
        let c = r
            .captures(s)
            .ok_or_else(|| anyhow!("Illegal region: {}", s))?;
        let contig = c[1].to_owned();
        let start = c
            .get(2)
            .map(|m| parse_usize_with_commas(m.as_str()))
            .transpose()?
            .flatten();
        let end = c
            .get(3)
            .map(|m| parse_usize_with_commas(m.as_str()))
            .transpose()?
            .flatten();
        match (start, end) {
            (Some(a), Some(b)) if a >= b => Err(anyhow!("Range error in {} - {} >= {}", s, a, b)),
            _ => Ok(Self { contig, start, end }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_contig() {
        let r = Region::from_str("chr20").unwrap();
        assert_eq!(r.contig(), "chr20");
        assert_eq!(r.start(), None);
        assert_eq!(r.end(), None);
    }

    #[test]
    fn open_start() {
        let r = Region::from_str("utg000001c:-3762624").unwrap();
        assert_eq!(r.contig(), "utg000001c");
        assert_eq!(r.start(), None);
        assert_eq!(r.end(), Some(3762624));
    }

    #[test]
    fn full_range_with_commas() {
        let r = Region::from_str("chr1:1,000-2,500").unwrap();
        assert_eq!((r.start(), r.end()), (Some(1000), Some(2500)));
        let r = Region::from_str("chr1:1000-").unwrap();
        assert_eq!((r.start(), r.end()), (Some(1000), None));
    }

    #[test]
    fn contig_with_colons_is_kept_whole() {
        let r = Region::from_str("HLA-A*01:01:01:01").unwrap();
        assert_eq!(r.contig(), "HLA-A*01:01:01:01");
        assert_eq!(r.start(), None);
    }

    #[test]
    fn reject_inverted_and_empty() {
        assert!(Region::from_str("chr1:500-100").is_err());
        assert!(Region::from_str("chr1:100-100").is_err());
        assert!(Region::from_str("").is_err());
        assert!(Region::from_str("chr 1").is_err());
    }
}
