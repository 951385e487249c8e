//! Pixel regions as sets of axis-aligned rectangles.
//!
//! A region is kept band-normalized: rows of identical vertical extent,
//! each holding a sorted list of disjoint horizontal spans. Rectangle
//! enumeration therefore yields non-overlapping rectangles in top-to-bottom
//! band order with ascending x inside a band, which the CopyRect emission
//! order relies on.

/// A half-open rectangle: pixels with `x1 <= x < x2` and `y1 <= y < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Rect {
        Rect { x1, y1, x2, y2 }
    }

    pub fn from_size(x: i32, y: i32, width: i32, height: i32) -> Rect {
        Rect { x1: x, y1: y, x2: x + width, y2: y + height }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Intersection of two rectangles; `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 > x1 && y2 > y1 {
            Some(Rect::new(x1, y1, x2, y2))
        } else {
            None
        }
    }
}

/// One horizontal band: spans are sorted, disjoint and non-adjacent.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Band {
    y1: i32,
    y2: i32,
    spans: Vec<(i32, i32)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    bands: Vec<Band>,
}

impl Region {
    pub fn new() -> Region {
        Region { bands: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Region {
        if rect.is_empty() {
            return Region::new();
        }
        Region {
            bands: vec![Band {
                y1: rect.y1,
                y2: rect.y2,
                spans: vec![(rect.x1, rect.x2)],
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn clear(&mut self) {
        self.bands.clear();
    }

    pub fn union(&self, other: &Region) -> Region {
        combine(self, other, |a, b| a || b)
    }

    pub fn intersect(&self, other: &Region) -> Region {
        combine(self, other, |a, b| a && b)
    }

    pub fn subtract(&self, other: &Region) -> Region {
        combine(self, other, |a, b| a && !b)
    }

    pub fn add_rect(&mut self, rect: Rect) {
        *self = self.union(&Region::from_rect(rect));
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        Region {
            bands: self
                .bands
                .iter()
                .map(|band| Band {
                    y1: band.y1 + dy,
                    y2: band.y2 + dy,
                    spans: band.spans.iter().map(|&(x1, x2)| (x1 + dx, x2 + dx)).collect(),
                })
                .collect(),
        }
    }

    /// Bounding box of the region; the empty rectangle for an empty region.
    pub fn extents(&self) -> Rect {
        if self.bands.is_empty() {
            return Rect::new(0, 0, 0, 0);
        }
        let y1 = self.bands.first().unwrap().y1;
        let y2 = self.bands.last().unwrap().y2;
        let mut x1 = i32::max_value();
        let mut x2 = i32::min_value();
        for band in &self.bands {
            x1 = x1.min(band.spans.first().unwrap().0);
            x2 = x2.max(band.spans.last().unwrap().1);
        }
        Rect::new(x1, y1, x2, y2)
    }

    /// The region's rectangles in band order: top-to-bottom, ascending x
    /// inside each band.
    pub fn rects(&self) -> Vec<Rect> {
        let mut rects = Vec::new();
        for band in &self.bands {
            for &(x1, x2) in &band.spans {
                rects.push(Rect::new(x1, band.y1, x2, band.y2));
            }
        }
        rects
    }

    pub fn num_rects(&self) -> usize {
        self.bands.iter().map(|band| band.spans.len()).sum()
    }

    /// Total number of pixels covered.
    pub fn area(&self) -> u64 {
        let mut area = 0u64;
        for band in &self.bands {
            let height = (band.y2 - band.y1) as u64;
            for &(x1, x2) in &band.spans {
                area += (x2 - x1) as u64 * height;
            }
        }
        area
    }
}

/// Boolean combination of two span lists over the x axis.
fn combine_spans(
    a: &[(i32, i32)],
    b: &[(i32, i32)],
    keep: &dyn Fn(bool, bool) -> bool,
) -> Vec<(i32, i32)> {
    let mut cuts: Vec<i32> = Vec::with_capacity(2 * (a.len() + b.len()));
    for &(x1, x2) in a.iter().chain(b.iter()) {
        cuts.push(x1);
        cuts.push(x2);
    }
    cuts.sort_unstable();
    cuts.dedup();

    let mut out: Vec<(i32, i32)> = Vec::new();
    let (mut ia, mut ib) = (0, 0);
    for window in cuts.windows(2) {
        let (x1, x2) = (window[0], window[1]);
        while ia < a.len() && a[ia].1 <= x1 {
            ia += 1;
        }
        while ib < b.len() && b[ib].1 <= x1 {
            ib += 1;
        }
        let in_a = ia < a.len() && a[ia].0 <= x1;
        let in_b = ib < b.len() && b[ib].0 <= x1;
        if keep(in_a, in_b) {
            match out.last_mut() {
                Some(last) if last.1 == x1 => last.1 = x2,
                _ => out.push((x1, x2)),
            }
        }
    }
    out
}

/// Boolean combination of two regions: slice both into elementary y slabs,
/// combine span lists per slab, then coalesce vertically identical bands.
fn combine(a: &Region, b: &Region, keep: impl Fn(bool, bool) -> bool) -> Region {
    let mut cuts: Vec<i32> = Vec::with_capacity(2 * (a.bands.len() + b.bands.len()));
    for band in a.bands.iter().chain(b.bands.iter()) {
        cuts.push(band.y1);
        cuts.push(band.y2);
    }
    cuts.sort_unstable();
    cuts.dedup();

    static EMPTY: [(i32, i32); 0] = [];
    let mut bands: Vec<Band> = Vec::new();
    let (mut ia, mut ib) = (0, 0);
    for window in cuts.windows(2) {
        let (y1, y2) = (window[0], window[1]);
        while ia < a.bands.len() && a.bands[ia].y2 <= y1 {
            ia += 1;
        }
        while ib < b.bands.len() && b.bands[ib].y2 <= y1 {
            ib += 1;
        }
        let spans_a = if ia < a.bands.len() && a.bands[ia].y1 <= y1 {
            &a.bands[ia].spans[..]
        } else {
            &EMPTY[..]
        };
        let spans_b = if ib < b.bands.len() && b.bands[ib].y1 <= y1 {
            &b.bands[ib].spans[..]
        } else {
            &EMPTY[..]
        };
        let spans = combine_spans(spans_a, spans_b, &keep);
        if spans.is_empty() {
            continue;
        }
        match bands.last_mut() {
            Some(last) if last.y2 == y1 && last.spans == spans => last.y2 = y2,
            _ => bands.push(Band { y1, y2, spans }),
        }
    }
    Region { bands }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x1: i32, y1: i32, x2: i32, y2: i32) -> Rect {
        Rect::new(x1, y1, x2, y2)
    }

    #[test]
    fn union_of_disjoint_rects_keeps_both() {
        let mut region = Region::from_rect(rect(0, 0, 10, 10));
        region.add_rect(rect(20, 20, 30, 30));
        assert_eq!(region.num_rects(), 2);
        assert_eq!(region.area(), 200);
        assert_eq!(region.extents(), rect(0, 0, 30, 30));
    }

    #[test]
    fn union_merges_adjacent_rects() {
        let mut region = Region::from_rect(rect(0, 0, 10, 10));
        region.add_rect(rect(10, 0, 20, 10));
        assert_eq!(region.rects(), vec![rect(0, 0, 20, 10)]);

        let mut region = Region::from_rect(rect(0, 0, 10, 10));
        region.add_rect(rect(0, 10, 10, 20));
        assert_eq!(region.rects(), vec![rect(0, 0, 10, 20)]);
    }

    #[test]
    fn intersect_clips_to_overlap() {
        let a = Region::from_rect(rect(0, 0, 10, 10));
        let b = Region::from_rect(rect(5, 5, 15, 15));
        assert_eq!(a.intersect(&b).rects(), vec![rect(5, 5, 10, 10)]);
        assert!(a.intersect(&Region::new()).is_empty());
    }

    #[test]
    fn subtract_punches_holes() {
        let a = Region::from_rect(rect(0, 0, 30, 30));
        let b = Region::from_rect(rect(10, 10, 20, 20));
        let diff = a.subtract(&b);
        assert_eq!(diff.area(), 900 - 100);
        assert!(diff.intersect(&b).is_empty());
        assert_eq!(diff.union(&b), a);
    }

    #[test]
    fn subtract_everything_is_empty() {
        let a = Region::from_rect(rect(3, 4, 17, 24));
        assert!(a.subtract(&a).is_empty());
    }

    #[test]
    fn translate_shifts_extents() {
        let a = Region::from_rect(rect(1, 2, 5, 6)).translated(10, -2);
        assert_eq!(a.extents(), rect(11, 0, 15, 4));
    }

    #[test]
    fn rects_enumerate_in_band_order() {
        let mut region = Region::from_rect(rect(0, 0, 10, 10));
        region.add_rect(rect(20, 0, 30, 10));
        region.add_rect(rect(5, 10, 25, 20));
        let rects = region.rects();
        assert_eq!(
            rects,
            vec![rect(0, 0, 10, 10), rect(20, 0, 30, 10), rect(5, 10, 25, 20)]
        );
        // Band order: y weakly increasing, x increasing inside a band.
        for pair in rects.windows(2) {
            assert!(pair[0].y1 < pair[1].y1 || pair[0].x2 <= pair[1].x1);
        }
    }

    #[test]
    fn empty_rect_produces_empty_region() {
        assert!(Region::from_rect(rect(5, 5, 5, 10)).is_empty());
        assert!(Region::from_rect(rect(5, 5, 10, 5)).is_empty());
    }

    #[test]
    fn operations_are_consistent_on_random_grid() {
        // Cross-check the band algebra against a brute-force pixel grid.
        let a_rects = [rect(0, 0, 13, 7), rect(5, 3, 20, 15), rect(18, 0, 25, 25)];
        let b_rects = [rect(2, 2, 8, 20), rect(10, 5, 22, 9)];
        let mut a = Region::new();
        let mut b = Region::new();
        for &r in &a_rects {
            a.add_rect(r);
        }
        for &r in &b_rects {
            b.add_rect(r);
        }
        let inside = |rects: &[Rect], x: i32, y: i32| {
            rects.iter().any(|r| x >= r.x1 && x < r.x2 && y >= r.y1 && y < r.y2)
        };
        let union = a.union(&b);
        let inter = a.intersect(&b);
        let diff = a.subtract(&b);
        for y in 0..26 {
            for x in 0..26 {
                let in_a = inside(&a_rects, x, y);
                let in_b = inside(&b_rects, x, y);
                let point = Region::from_rect(rect(x, y, x + 1, y + 1));
                assert_eq!(!union.intersect(&point).is_empty(), in_a || in_b);
                assert_eq!(!inter.intersect(&point).is_empty(), in_a && in_b);
                assert_eq!(!diff.intersect(&point).is_empty(), in_a && !in_b);
            }
        }
    }
}
