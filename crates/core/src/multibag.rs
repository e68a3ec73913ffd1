//! Multibag profile metadata found inside head bags.
//!
//! A head bag carries a file-lookup table mapping every payload path
//! (`data/...`) to the name of the member bag holding its bytes, and a list
//! of member bags. Profile 0.2 separated fields with spaces; later profiles
//! use tabs.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Profile assumed when a bag name does not say.
pub const DEFAULT_MULTIBAG_VERSION: &str = "0.4";

fn is_legacy(mbag_version: &str) -> bool {
    mbag_version == "0.2"
}

fn split_fields<'a>(mbag_version: &str, line: &'a str) -> Vec<&'a str> {
    if is_legacy(mbag_version) {
        line.split(' ').filter(|f| !f.is_empty()).collect()
    } else {
        line.split('\t').collect()
    }
}

/// Zip entry name of the file-lookup table inside a head bag.
pub fn file_lookup_entry(bagname: &str, mbag_version: &str) -> String {
    if is_legacy(mbag_version) {
        format!("{bagname}/multibag/group-directory.txt")
    } else {
        format!("{bagname}/multibag/file-lookup.tsv")
    }
}

/// Zip entry name of the member-bag list inside a head bag.
pub fn member_bags_entry(bagname: &str, mbag_version: &str) -> String {
    if is_legacy(mbag_version) {
        format!("{bagname}/multibag/group-members.txt")
    } else {
        format!("{bagname}/multibag/member-bags.tsv")
    }
}

/// Parse a file-lookup table into a map of bag-relative path to member bag.
pub fn parse_file_lookup(mbag_version: &str, contents: &str) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = split_fields(mbag_version, line);
        if fields.len() < 2 {
            return Err(Error::FileLookup(format!(
                "line with too few fields (is the multibag version correct?): {line}"
            )));
        }
        out.insert(fields[0].to_string(), fields[1].trim().to_string());
    }
    Ok(out)
}

/// Parse a member-bag list, returning bag names in their listed order.
pub fn parse_member_bags(mbag_version: &str, contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| split_fields(mbag_version, l).first().map(|f| f.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tab_lookup() {
        let text = "data/file.csv\tmds2-2106.1_2_0.mbag0_4-2\n\
                    data/sub/a.txt\tmds2-2106.1_2_0.mbag0_4-1\n\
                    metadata/nerdm.json\tmds2-2106.1_2_0.mbag0_4-1\n";
        let lu = parse_file_lookup("0.4", text).unwrap();
        assert_eq!(lu.len(), 3);
        assert_eq!(lu["data/file.csv"], "mds2-2106.1_2_0.mbag0_4-2");
    }

    #[test]
    fn test_parse_legacy_lookup() {
        let text = "data/file.csv   mds1491.mbag0_2-0\n";
        let lu = parse_file_lookup("0.2", text).unwrap();
        assert_eq!(lu["data/file.csv"], "mds1491.mbag0_2-0");
    }

    #[test]
    fn test_wrong_delimiter_is_an_error() {
        let text = "data/file.csv mds1491.mbag0_2-0\n";
        assert!(parse_file_lookup("0.4", text).is_err());
    }

    #[test]
    fn test_entry_names() {
        assert_eq!(
            file_lookup_entry("b.mbag0_4-1", "0.4"),
            "b.mbag0_4-1/multibag/file-lookup.tsv"
        );
        assert_eq!(
            member_bags_entry("b.mbag0_2-1", "0.2"),
            "b.mbag0_2-1/multibag/group-members.txt"
        );
        assert_eq!(parse_member_bags("0.4", "b-1\tx\nb-2\n"), vec!["b-1", "b-2"]);
    }
}
