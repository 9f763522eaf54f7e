use std::cmp::Ordering;

use crate::index::FileEntry;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SortKey {
    Name,
    Type,
    LastModified,
}

impl SortKey {
    pub fn all() -> [Self; 3] {
        [Self::Name, Self::Type, Self::LastModified]
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Type => "Type",
            Self::LastModified => "Date",
        }
    }
}

/// Natural-order comparison: runs of digits compare as integers (so
/// `img2 < img10`), everything else compares case-folded per character.
/// Equal-valued runs with leading zeros tie-break on run length.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ca = a.chars().peekable();
    let mut cb = b.chars().peekable();

    loop {
        match (ca.peek().copied(), cb.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (va, la) = take_number(&mut ca);
                let (vb, lb) = take_number(&mut cb);
                match va.cmp(&vb).then(la.cmp(&lb)) {
                    Ordering::Equal => {}
                    ord => return ord,
                }
            }
            (Some(x), Some(y)) => {
                let fx = x.to_ascii_lowercase();
                let fy = y.to_ascii_lowercase();
                match fx.cmp(&fy) {
                    Ordering::Equal => {
                        ca.next();
                        cb.next();
                    }
                    ord => return ord,
                }
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> (u128, usize) {
    let mut value: u128 = 0;
    let mut len = 0usize;
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        // Saturate rather than wrap on absurdly long runs.
        value = value
            .saturating_mul(10)
            .saturating_add((c as u8 - b'0') as u128);
        len += 1;
        chars.next();
    }
    (value, len)
}

/// Ordering of two index entries under the active sort. Type and date sorts
/// tie-break on the natural path order so the result is total.
#[inline]
pub fn compare_entries(a: &FileEntry, b: &FileEntry, key: SortKey, reverse: bool) -> Ordering {
    let ord = match key {
        SortKey::Name => natural_cmp(&a.rel_path, &b.rel_path),
        SortKey::Type => a
            .type_string
            .cmp(&b.type_string)
            .then_with(|| natural_cmp(&a.rel_path, &b.rel_path)),
        SortKey::LastModified => a
            .modified
            .cmp(&b.modified)
            .then_with(|| natural_cmp(&a.rel_path, &b.rel_path)),
    };
    if reverse {
        ord.reverse()
    } else {
        ord
    }
}

#[inline]
pub fn sort_entries(entries: &mut [FileEntry], key: SortKey, reverse: bool) {
    entries.sort_by(|a, b| compare_entries(a, b, key, reverse));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn entry(path: &str, ty: &str, modified_s: u64) -> FileEntry {
        FileEntry {
            rel_path: path.to_string(),
            dir_hash: 0,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(modified_s)),
            type_string: ty.to_string(),
        }
    }

    #[test]
    fn numeric_runs_compare_as_integers() {
        assert_eq!(natural_cmp("img2.png", "img10.png"), Ordering::Less);
        assert_eq!(natural_cmp("img10.png", "img2.png"), Ordering::Greater);
        assert_eq!(natural_cmp("a99z", "a100a"), Ordering::Less);
    }

    #[test]
    fn case_is_folded() {
        assert_eq!(natural_cmp("Apple.png", "apple.png"), Ordering::Equal);
        assert_eq!(natural_cmp("Banana", "apple"), Ordering::Greater);
    }

    #[test]
    fn leading_zeros_tie_break_on_length() {
        assert_eq!(natural_cmp("img007", "img7"), Ordering::Greater);
        assert_eq!(natural_cmp("img7", "img007"), Ordering::Less);
    }

    #[test]
    fn sort_by_name_is_natural() {
        let mut entries = vec![
            entry("img10.png", "png", 0),
            entry("img2.png", "png", 0),
            entry("img1.png", "png", 0),
        ];
        sort_entries(&mut entries, SortKey::Name, false);
        let names: Vec<_> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(names, ["img1.png", "img2.png", "img10.png"]);
    }

    #[test]
    fn sort_by_type_breaks_ties_on_name() {
        let mut entries = vec![
            entry("b.png", "png", 0),
            entry("a.gif", "gif", 0),
            entry("a.png", "png", 0),
        ];
        sort_entries(&mut entries, SortKey::Type, false);
        let names: Vec<_> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(names, ["a.gif", "a.png", "b.png"]);
    }

    #[test]
    fn sort_by_modified_reversed() {
        let mut entries = vec![
            entry("old.png", "png", 100),
            entry("new.png", "png", 300),
            entry("mid.png", "png", 200),
        ];
        sort_entries(&mut entries, SortKey::LastModified, true);
        let names: Vec<_> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(names, ["new.png", "mid.png", "old.png"]);
    }
}
