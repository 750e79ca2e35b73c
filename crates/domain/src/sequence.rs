//! Successor and predecessor of physical review ids.
//!
//! Both walk the three-digit groups from the right. Incrementing `z` rolls
//! the group over to `0` and carries left; a carry out of the leftmost group
//! grows the id by one `0` group, so `"z"` is followed by `"00"`.

use crate::DomainResult;
use crate::review_id::{GROUP_WIDTH, group_codes};

const CODE_ZERO: u32 = b'0' as u32;
const CODE_NINE: u32 = b'9' as u32;
const CODE_UPPER_A: u32 = b'A' as u32;
const CODE_UPPER_Z: u32 = b'Z' as u32;
const CODE_LOWER_A: u32 = b'a' as u32;
const CODE_LOWER_Z: u32 = b'z' as u32;

enum Step {
    Value(u32),
    Wrap(u32),
}

fn successor(code: u32) -> Step {
    match code {
        CODE_NINE => Step::Value(CODE_UPPER_A),
        CODE_UPPER_Z => Step::Value(CODE_LOWER_A),
        CODE_LOWER_Z => Step::Wrap(CODE_ZERO),
        other => Step::Value(other + 1),
    }
}

fn predecessor(code: u32) -> Step {
    match code {
        CODE_UPPER_A => Step::Value(CODE_NINE),
        CODE_LOWER_A => Step::Value(CODE_UPPER_Z),
        CODE_ZERO => Step::Wrap(CODE_LOWER_Z),
        other => Step::Value(other - 1),
    }
}

fn render(codes: &[u32]) -> String {
    let mut physical = String::with_capacity(codes.len() * GROUP_WIDTH);
    for code in codes {
        physical.push_str(&format!("{code:03}"));
    }
    physical
}

fn parse_unchecked(physical: &str) -> Vec<u32> {
    physical
        .as_bytes()
        .chunks(GROUP_WIDTH)
        .map(|group| {
            group
                .iter()
                .fold(0u32, |acc, digit| acc * 10 + u32::from(digit.wrapping_sub(b'0')))
        })
        .collect()
}

/// Successor of an already validated physical id. The empty string is
/// followed by `"048"`.
pub(crate) fn next_physical(physical: &str) -> String {
    let mut codes = parse_unchecked(physical);
    let mut index = codes.len();
    loop {
        if index == 0 {
            codes.insert(0, CODE_ZERO);
            break;
        }
        index -= 1;
        match successor(codes[index]) {
            Step::Value(code) => {
                codes[index] = code;
                break;
            }
            Step::Wrap(code) => codes[index] = code,
        }
    }
    render(&codes)
}

/// Predecessor of an already validated physical id; `None` for `"048"`,
/// the first id ever allocated.
pub(crate) fn previous_physical(physical: &str) -> Option<String> {
    let mut codes = parse_unchecked(physical);
    let mut index = codes.len();
    loop {
        if index == 0 {
            // every group borrowed: the id was all `0`s and shrinks by one
            codes.remove(0);
            break;
        }
        index -= 1;
        match predecessor(codes[index]) {
            Step::Value(code) => {
                codes[index] = code;
                break;
            }
            Step::Wrap(code) => codes[index] = code,
        }
    }
    if codes.is_empty() {
        None
    } else {
        Some(render(&codes))
    }
}

/// Next physical id after `physical`. An empty input yields the first id.
pub fn next(physical: &str) -> DomainResult<String> {
    if !physical.is_empty() {
        group_codes(physical)?;
    }
    Ok(next_physical(physical))
}

/// Previous physical id, or `None` when `physical` is the first id.
pub fn previous(physical: &str) -> DomainResult<Option<String>> {
    group_codes(physical)?;
    Ok(previous_physical(physical))
}
