//! Screen coordinates extracted from `uiautomator` hierarchy dumps.
//!
//! A dump is a single line of XML in which every node carries a
//! `bounds="[x1,y1][x2,y2]"` attribute. This module turns those bounding boxes
//! into tap targets and splits a raw dump into per-node tokens. Nodes are
//! derived data: they are recomputed from every dump and never cached.
//!
//! # Example
//!
//! ```
//! use droidctl_core::coords::{node_tokens, tap_point, Point};
//!
//! let center = tap_point("[0,0][1080,200]").unwrap();
//! assert_eq!(center, Point { x: 540, y: 100 });
//!
//! let dump = r#"<hierarchy><node text="OK" bounds="[10,10][30,30]"/><node bounds="" /></hierarchy>"#;
//! assert_eq!(node_tokens(dump).count(), 1);
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DroidError, Result};

static BOUNDS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d+),(\d+)\]\[(\d+),(\d+)\]").expect("Invalid bounds pattern regex")
});

/// A point on the device screen, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal offset from the left edge.
    pub x: u32,
    /// Vertical offset from the top edge.
    pub y: u32,
}

impl Point {
    /// Creates a point.
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The bounding box of one UI node, as two corner points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    /// Top-left corner.
    pub top_left: Point,
    /// Bottom-right corner.
    pub bottom_right: Point,
}

impl Bounds {
    /// Parses the first `[x1,y1][x2,y2]` box found in `token`.
    ///
    /// # Errors
    ///
    /// [`DroidError::Parse`] if no box is present or a coordinate does not
    /// fit in a `u32`.
    pub fn parse(token: &str) -> Result<Self> {
        let caps = BOUNDS_PATTERN
            .captures(token)
            .ok_or_else(|| DroidError::parse(token, "invalid format; expected [x1,y1][x2,y2]"))?;

        let mut values = [0u32; 4];
        for (slot, value) in values.iter_mut().enumerate() {
            let digits = &caps[slot + 1];
            *value = digits
                .parse()
                .map_err(|e| DroidError::parse(token, format!("coordinate {digits}: {e}")))?;
        }

        Ok(Self {
            top_left: Point::new(values[0], values[1]),
            bottom_right: Point::new(values[2], values[3]),
        })
    }

    /// Midpoint of the box, using floor division.
    pub fn center(&self) -> Point {
        let mid = |a: u32, b: u32| ((u64::from(a) + u64::from(b)) / 2) as u32;
        Point {
            x: mid(self.top_left.x, self.bottom_right.x),
            y: mid(self.top_left.y, self.bottom_right.y),
        }
    }
}

/// Converts a `[x1,y1][x2,y2]` token into its center tap point.
pub fn tap_point(token: &str) -> Result<Point> {
    Bounds::parse(token).map(|b| b.center())
}

/// Splits a raw dump into one token per element, keeping only tokens that
/// carry a bounding box.
///
/// Element boundaries are a `>` immediately followed by `<`. Order is document
/// order, which is not necessarily top-to-bottom on screen.
pub fn node_tokens(dump: &str) -> impl Iterator<Item = &str> + '_ {
    let mut rest = Some(dump);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find("><") {
            Some(idx) => {
                rest = Some(&current[idx + 1..]);
                Some(&current[..=idx])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
    .map(str::trim)
    .filter(|token| BOUNDS_PATTERN.is_match(token))
}

/// One node from a hierarchy dump together with its parsed bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenNode<'a> {
    /// The raw element token.
    pub raw: &'a str,
    /// Bounding box of the element.
    pub bounds: Bounds,
}

impl<'a> ScreenNode<'a> {
    /// Value of an XML attribute on this node, e.g. `text` or `resource-id`.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        let key = format!(" {name}=\"");
        let start = self.raw.find(&key)? + key.len();
        let len = self.raw[start..].find('"')?;
        Some(&self.raw[start..start + len])
    }

    /// Center of the node, i.e. where a tap should land.
    pub fn center(&self) -> Point {
        self.bounds.center()
    }

    fn mentions(&self, needle: &str) -> bool {
        ["text", "content-desc", "resource-id"]
            .iter()
            .filter_map(|name| self.attr(name))
            .any(|value| value.to_lowercase().contains(needle))
    }
}

/// Parses every bounded node token in `dump`.
pub fn screen_nodes(dump: &str) -> impl Iterator<Item = ScreenNode<'_>> + '_ {
    node_tokens(dump).filter_map(|raw| {
        Bounds::parse(raw)
            .ok()
            .map(|bounds| ScreenNode { raw, bounds })
    })
}

/// First node whose `text`, `content-desc` or `resource-id` contains `needle`
/// (case-insensitive).
pub fn find_node<'a>(dump: &'a str, needle: &str) -> Option<ScreenNode<'a>> {
    let needle = needle.to_lowercase();
    screen_nodes(dump).find(|node| node.mentions(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_DUMP: &str = concat!(
        r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>"#,
        r#"<hierarchy rotation="0">"#,
        r#"<node index="0" text="" resource-id="" class="android.widget.FrameLayout" content-desc="" bounds="[0,0][1080,2400]">"#,
        r#"<node index="0" text="Sign in" resource-id="com.example:id/login" class="android.widget.Button" content-desc="" bounds="[100,2000][980,2150]" />"#,
        r#"<node index="1" text="" resource-id="com.example:id/avatar" class="android.widget.ImageView" content-desc="Profile picture" bounds="[40,120][200,280]" />"#,
        r#"</node>"#,
        r#"</hierarchy>"#
    );

    #[test]
    fn test_tap_point_midpoint() {
        assert_eq!(tap_point("[0,0][1080,2400]").unwrap(), Point::new(540, 1200));
        assert_eq!(tap_point("[100,2000][980,2150]").unwrap(), Point::new(540, 2075));
    }

    #[test]
    fn test_tap_point_floor_division() {
        assert_eq!(tap_point("[0,0][3,5]").unwrap(), Point::new(1, 2));
        assert_eq!(tap_point("[1,1][2,2]").unwrap(), Point::new(1, 1));
    }

    #[test]
    fn test_tap_point_degenerate_box() {
        assert_eq!(tap_point("[7,9][7,9]").unwrap(), Point::new(7, 9));
    }

    #[test]
    fn test_tap_point_no_overflow_at_u32_max() {
        let token = format!("[{m},{m}][{m},{m}]", m = u32::MAX);
        assert_eq!(tap_point(&token).unwrap(), Point::new(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_tap_point_inside_node_token() {
        let token = r#"<node text="OK" bounds="[10,20][30,40]" />"#;
        assert_eq!(tap_point(token).unwrap(), Point::new(20, 30));
    }

    #[test]
    fn test_malformed_tokens_are_parse_errors() {
        for token in [
            "",
            "[1,2]",
            "[1,2][3]",
            "[a,b][c,d]",
            "[-1,2][3,4]",
            "(1,2)(3,4)",
            "[1, 2][3, 4]",
            "bounds=\"\"",
        ] {
            match tap_point(token) {
                Err(DroidError::Parse { input, .. }) => assert_eq!(input, token),
                other => panic!("expected Parse error for {token:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_coordinate_overflow_is_parse_error() {
        let result = tap_point("[99999999999,0][1,1]");
        assert!(matches!(result, Err(DroidError::Parse { .. })));
    }

    #[test]
    fn test_node_tokens_filters_unbounded_elements() {
        let tokens: Vec<&str> = node_tokens(SAMPLE_DUMP).collect();
        assert_eq!(tokens.len(), 3);
        assert!(tokens[0].contains("FrameLayout"));
        assert!(tokens[1].contains("Sign in"));
        assert!(tokens[2].contains("Profile picture"));
        assert!(tokens.iter().all(|t| t.starts_with('<') && t.ends_with('>')));
    }

    #[test]
    fn test_node_tokens_is_idempotent() {
        let first: Vec<&str> = node_tokens(SAMPLE_DUMP).collect();
        let second: Vec<&str> = node_tokens(SAMPLE_DUMP).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_node_tokens_empty_dump() {
        assert_eq!(node_tokens("").count(), 0);
        assert_eq!(node_tokens("<hierarchy></hierarchy>").count(), 0);
    }

    #[test]
    fn test_screen_node_attributes() {
        let nodes: Vec<ScreenNode> = screen_nodes(SAMPLE_DUMP).collect();
        assert_eq!(nodes[1].attr("text"), Some("Sign in"));
        assert_eq!(nodes[1].attr("resource-id"), Some("com.example:id/login"));
        assert_eq!(nodes[1].attr("missing"), None);
        assert_eq!(nodes[2].attr("content-desc"), Some("Profile picture"));
    }

    #[test]
    fn test_find_node_by_text_and_description() {
        let login = find_node(SAMPLE_DUMP, "sign IN").unwrap();
        assert_eq!(login.center(), Point::new(540, 2075));

        let avatar = find_node(SAMPLE_DUMP, "profile").unwrap();
        assert_eq!(avatar.center(), Point::new(120, 200));

        let by_id = find_node(SAMPLE_DUMP, "id/avatar").unwrap();
        assert_eq!(by_id.bounds, avatar.bounds);

        assert!(find_node(SAMPLE_DUMP, "checkout").is_none());
    }
}
