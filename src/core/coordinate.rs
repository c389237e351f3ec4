//! Coordinate resolution for the 64×6 reference space.
//!
//! Three user-supplied integers select one of 64 hexagrams (an 8×8 parent
//! grid) and one of its six lines. Reduction uses floored modulo, so negative
//! inputs still land inside the grid.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Side length of the parent grid.
pub const PARENT_AXIS: i64 = 8;

/// Number of child positions (lines) under each parent.
pub const CHILD_COUNT: i64 = 6;

/// Object name of the hexagram image under each coordinate directory.
pub const IMAGE_FILE_NAME: &str = "hexagram.jpg";

/// Position of a hexagram in the 8×8 parent grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentCoord {
    pub x: u8,
    pub y: u8,
}

impl fmt::Display for ParentCoord {
    /// Store key form, e.g. `3-3`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.x, self.y)
    }
}

/// A resolved `(parent, child)` pair.
///
/// Values produced by [`resolve`] are always in range. Hand-built or
/// deserialized values are not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub parent: ParentCoord,
    pub child: u8,
}

impl Coordinate {
    /// Key of the parent row in the reference-text table.
    pub fn parent_key(&self) -> String {
        self.parent.to_string()
    }

    /// Key of the child row in the reference-text table.
    pub fn child_key(&self) -> String {
        self.child.to_string()
    }

    /// Object path of the hexagram image, `"{parent}/{child}/hexagram.jpg"`.
    pub fn image_object_path(&self) -> String {
        format!("{}/{}/{}", self.parent, self.child, IMAGE_FILE_NAME)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.child)
    }
}

/// Map three integers onto a coordinate.
///
/// `parent = (first mod 8, second mod 8)`, `child = third mod 6`, all floored.
pub fn resolve(first: i64, second: i64, third: i64) -> Coordinate {
    Coordinate {
        parent: ParentCoord {
            x: first.rem_euclid(PARENT_AXIS) as u8,
            y: second.rem_euclid(PARENT_AXIS) as u8,
        },
        child: third.rem_euclid(CHILD_COUNT) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(x: u8, y: u8, child: u8) -> Coordinate {
        Coordinate {
            parent: ParentCoord { x, y },
            child,
        }
    }

    #[test]
    fn test_resolve_wraps_multiples() {
        assert_eq!(resolve(8, 16, 6), coord(0, 0, 0));
    }

    #[test]
    fn test_resolve_reduces_each_axis() {
        assert_eq!(resolve(3, 11, 7), coord(3, 3, 1));
    }

    #[test]
    fn test_resolve_same_value_on_all_axes() {
        for a in -50i64..50 {
            let c = resolve(a, a, a);
            assert_eq!(i64::from(c.parent.x), a.rem_euclid(8));
            assert_eq!(i64::from(c.parent.y), a.rem_euclid(8));
            assert_eq!(i64::from(c.child), a.rem_euclid(6));
        }
    }

    #[test]
    fn test_resolve_is_periodic() {
        for a in [-17i64, -1, 0, 5, 42, 1_000_003] {
            for k in [-3i64, -1, 1, 7] {
                assert_eq!(resolve(a, a, a), resolve(a + 8 * k, a - 8 * k, a + 6 * k));
            }
        }
    }

    #[test]
    fn test_resolve_negative_inputs_stay_in_bounds() {
        assert_eq!(resolve(-1, -9, -1), coord(7, 7, 5));
        let c = resolve(i64::MIN, i64::MIN + 1, i64::MIN);
        assert!(c.parent.x < 8 && c.parent.y < 8 && c.child < 6);
        let c = resolve(i64::MAX, i64::MAX, i64::MAX);
        assert!(c.parent.x < 8 && c.parent.y < 8 && c.child < 6);
    }

    #[test]
    fn test_store_keys_and_image_path() {
        let c = resolve(3, 11, 7);
        assert_eq!(c.parent_key(), "3-3");
        assert_eq!(c.child_key(), "1");
        assert_eq!(c.image_object_path(), "3-3/1/hexagram.jpg");
        assert_eq!(c.to_string(), "3-3/1");
    }
}
