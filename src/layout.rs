use std::collections::HashMap;
use std::hash::Hash;

/// A rectangle of screen cells. Zero rows or columns means no space was
/// available for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub y: u16,
    pub x: u16,
    pub rows: u16,
    pub cols: u16,
}

impl Region {
    pub const EMPTY: Region = Region {
        y: 0,
        x: 0,
        rows: 0,
        cols: 0,
    };

    pub fn new(y: u16, x: u16, rows: u16, cols: u16) -> Self {
        Self { y, x, rows, cols }
    }

    pub fn is_allocated(&self) -> bool {
        self.rows > 0 && self.cols > 0
    }

    /// Whether the absolute screen cell `(y, x)` falls inside this region.
    pub fn contains(&self, y: u16, x: u16) -> bool {
        y >= self.y
            && x >= self.x
            && u32::from(y) < u32::from(self.y) + u32::from(self.rows)
            && u32::from(x) < u32::from(self.x) + u32::from(self.cols)
    }

    /// The part of `self` also covered by `other`, in absolute coordinates.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let top = self.y.max(other.y);
        let left = self.x.max(other.x);
        let bottom = (u32::from(self.y) + u32::from(self.rows))
            .min(u32::from(other.y) + u32::from(other.rows));
        let right = (u32::from(self.x) + u32::from(self.cols))
            .min(u32::from(other.x) + u32::from(other.cols));
        if bottom <= u32::from(top) || right <= u32::from(left) {
            return None;
        }
        Some(Region {
            y: top,
            x: left,
            rows: (bottom - u32::from(top)) as u16,
            cols: (right - u32::from(left)) as u16,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Top,
    Bottom,
    Left,
    Right,
}

/// The outcome of [Layout::apply].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation<K: Eq + Hash> {
    pub regions: HashMap<K, Region>,
    pub primary: Region,
}

impl<K: Eq + Hash> Allocation<K> {
    /// The region for `key`, or [Region::EMPTY] if it is not part of the layout.
    pub fn region(&self, key: &K) -> Region {
        self.regions.get(key).copied().unwrap_or(Region::EMPTY)
    }
}

/// Ordered edge-window requests, one list per side. Insertion order is
/// stacking order: the first top request sits against the top edge.
#[derive(Debug, Clone)]
pub struct Layout<K> {
    top: Vec<(K, u16)>,
    bottom: Vec<(K, u16)>,
    left: Vec<(K, u16)>,
    right: Vec<(K, u16)>,
}

impl<K> Default for Layout<K> {
    fn default() -> Self {
        Self {
            top: Vec::new(),
            bottom: Vec::new(),
            left: Vec::new(),
            right: Vec::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> Layout<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, side: Side, key: K, size: u16) {
        self.side_mut(side).push((key, size));
    }

    /// Drop the request for `key`. Returns false if there was none.
    pub fn remove(&mut self, key: K) -> bool {
        for side in [Side::Top, Side::Bottom, Side::Left, Side::Right] {
            let requests = self.side_mut(side);
            if let Some(pos) = requests.iter().position(|(k, _)| *k == key) {
                requests.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.top.len() + self.bottom.len() + self.left.len() + self.right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Partition a `rows x cols` screen among the requests.
    ///
    /// Top requests stack downward from the top edge, then bottom requests
    /// upward from the bottom edge. Left and right requests then split the
    /// remaining row band, inward from their edges. A request gets exactly its
    /// size or nothing. Whatever is left over is the primary region.
    pub fn apply(&self, rows: u16, cols: u16) -> Option<Allocation<K>> {
        if rows == 0 || cols == 0 {
            return None;
        }

        let mut regions = HashMap::with_capacity(self.len());
        let mut top_used = 0u16;
        let mut bottom_used = 0u16;

        for &(key, size) in &self.top {
            let free = rows - top_used - bottom_used;
            let region = if size > 0 && size <= free {
                let region = Region::new(top_used, 0, size, cols);
                top_used += size;
                region
            } else {
                Region::EMPTY
            };
            regions.insert(key, region);
        }

        for &(key, size) in &self.bottom {
            let free = rows - top_used - bottom_used;
            let region = if size > 0 && size <= free {
                bottom_used += size;
                Region::new(rows - bottom_used, 0, size, cols)
            } else {
                Region::EMPTY
            };
            regions.insert(key, region);
        }

        let band_y = top_used;
        let band_rows = rows - top_used - bottom_used;
        let mut left_used = 0u16;
        let mut right_used = 0u16;

        for &(key, size) in &self.left {
            let free = cols - left_used - right_used;
            let region = if band_rows > 0 && size > 0 && size <= free {
                let region = Region::new(band_y, left_used, band_rows, size);
                left_used += size;
                region
            } else {
                Region::EMPTY
            };
            regions.insert(key, region);
        }

        for &(key, size) in &self.right {
            let free = cols - left_used - right_used;
            let region = if band_rows > 0 && size > 0 && size <= free {
                right_used += size;
                Region::new(band_y, cols - right_used, band_rows, size)
            } else {
                Region::EMPTY
            };
            regions.insert(key, region);
        }

        let primary_cols = cols - left_used - right_used;
        let primary = if band_rows > 0 && primary_cols > 0 {
            Region::new(band_y, left_used, band_rows, primary_cols)
        } else {
            Region::EMPTY
        };

        Some(Allocation { regions, primary })
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<(K, u16)> {
        match side {
            Side::Top => &mut self.top,
            Side::Bottom => &mut self.bottom,
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Allocation, Layout, Region, Side};

    /// Draw an allocation as a grid of letters, one per key, `.` for primary.
    fn render(alloc: &Allocation<char>, rows: u16, cols: u16) -> String {
        let mut lines = Vec::new();
        for y in 0..rows {
            let mut line = String::new();
            for x in 0..cols {
                let owner = alloc
                    .regions
                    .iter()
                    .find(|(_, region)| region.contains(y, x))
                    .map(|(key, _)| *key);
                let ch = match owner {
                    Some(key) => key,
                    None if alloc.primary.contains(y, x) => '.',
                    None => ' ',
                };
                line.push(ch);
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    #[test]
    fn no_requests_gives_whole_screen() {
        let layout: Layout<u32> = Layout::new();
        let alloc = layout.apply(24, 80).unwrap();
        assert_eq!(alloc.primary, Region::new(0, 0, 24, 80));
        assert!(alloc.regions.is_empty());
    }

    #[test]
    fn zero_dimensions_fail() {
        let layout: Layout<u32> = Layout::new();
        assert!(layout.apply(0, 80).is_none());
        assert!(layout.apply(24, 0).is_none());
    }

    #[test]
    fn top_and_bottom() {
        let mut layout = Layout::new();
        layout.push(Side::Top, 1, 2);
        layout.push(Side::Bottom, 2, 3);
        let alloc = layout.apply(20, 40).unwrap();
        assert_eq!(alloc.region(&1), Region::new(0, 0, 2, 40));
        assert_eq!(alloc.region(&2), Region::new(17, 0, 3, 40));
        assert_eq!(alloc.primary, Region::new(2, 0, 15, 40));
    }

    #[test]
    fn oversized_request_consumes_nothing() {
        let mut layout = Layout::new();
        layout.push(Side::Top, 1, 30);
        layout.push(Side::Top, 2, 4);
        let alloc = layout.apply(10, 20).unwrap();
        assert_eq!(alloc.region(&1), Region::EMPTY);
        assert_eq!(alloc.region(&2), Region::new(0, 0, 4, 20));
        assert_eq!(alloc.primary, Region::new(4, 0, 6, 20));
    }

    #[test]
    fn sides_use_only_the_remaining_band() {
        let mut layout = Layout::new();
        layout.push(Side::Left, 1, 5);
        layout.push(Side::Right, 2, 3);
        layout.push(Side::Top, 3, 2);
        layout.push(Side::Bottom, 4, 1);
        let alloc = layout.apply(12, 30).unwrap();
        assert_eq!(alloc.region(&1), Region::new(2, 0, 9, 5));
        assert_eq!(alloc.region(&2), Region::new(2, 27, 9, 3));
        assert_eq!(alloc.primary, Region::new(2, 5, 9, 22));
    }

    #[test]
    fn full_screen_of_edges_leaves_no_primary() {
        let mut layout = Layout::new();
        layout.push(Side::Top, 1, 3);
        layout.push(Side::Bottom, 2, 2);
        layout.push(Side::Left, 3, 10);
        let alloc = layout.apply(5, 10).unwrap();
        assert_eq!(alloc.region(&1), Region::new(0, 0, 3, 10));
        assert_eq!(alloc.region(&2), Region::new(3, 0, 2, 10));
        assert_eq!(alloc.region(&3), Region::EMPTY);
        assert_eq!(alloc.primary, Region::EMPTY);
    }

    #[test]
    fn removing_a_request_frees_its_space() {
        let mut layout = Layout::new();
        layout.push(Side::Top, 1, 2);
        layout.push(Side::Top, 2, 2);
        assert!(layout.remove(1));
        assert!(!layout.remove(1));
        let alloc = layout.apply(10, 10).unwrap();
        assert_eq!(alloc.region(&2), Region::new(0, 0, 2, 10));
        assert_eq!(alloc.primary, Region::new(2, 0, 8, 10));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut layout = Layout::new();
        layout.push(Side::Right, 1, 4);
        layout.push(Side::Top, 2, 1);
        assert_eq!(layout.apply(8, 16), layout.apply(8, 16));
    }

    #[test]
    fn shrinking_screen_keeps_fitting_requests() {
        let mut layout = Layout::new();
        layout.push(Side::Top, 1, 3);
        layout.push(Side::Bottom, 2, 1);

        let alloc = layout.apply(24, 80).unwrap();
        assert_eq!(alloc.primary, Region::new(3, 0, 20, 80));

        let alloc = layout.apply(10, 80).unwrap();
        assert_eq!(alloc.region(&1), Region::new(0, 0, 3, 80));
        assert_eq!(alloc.region(&2), Region::new(9, 0, 1, 80));
        assert_eq!(alloc.primary, Region::new(3, 0, 6, 80));
    }

    #[test]
    fn renders_mixed_layout() {
        let mut layout = Layout::new();
        layout.push(Side::Top, 'T', 1);
        layout.push(Side::Bottom, 'B', 1);
        layout.push(Side::Left, 'L', 2);
        layout.push(Side::Right, 'R', 1);
        layout.push(Side::Right, 'S', 1);
        let alloc = layout.apply(5, 10).unwrap();
        insta::assert_snapshot!(render(&alloc, 5, 10), @r"
        TTTTTTTTTT
        LL......SR
        LL......SR
        LL......SR
        BBBBBBBBBB
        ");
    }

    #[test]
    fn intersect_regions() {
        let a = Region::new(0, 0, 4, 4);
        let b = Region::new(2, 3, 5, 5);
        assert_eq!(a.intersect(&b), Some(Region::new(2, 3, 2, 1)));
        assert_eq!(a.intersect(&Region::new(4, 0, 1, 1)), None);
    }
}
