use std::collections::VecDeque;

use ratatui::{buffer::Buffer, layout::Rect, widgets::Widget};

pub const BAR_GLYPH: &str = "█";

/// Bytes per chart row on the generator side.
pub const STREAMER_SCALE: u64 = 100;
/// Bytes per chart row on the receiver side.
pub const RECEIVER_SCALE: u64 = 256;

/// Rows of a column for `value`, clamped to the chart height.
pub fn bar_height(value: u64, scale: u64, chart_height: u16) -> u16 {
    let rows = value / scale.max(1);
    rows.min(chart_height as u64) as u16
}

/// Oldest-discarded series of throughput points.
#[derive(Clone, Debug)]
pub struct History {
    capacity: usize,
    points: VecDeque<u64>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, points: VecDeque::with_capacity(capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, value: u64) {
        if self.capacity == 0 {
            return;
        }
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(value);
    }

    /// Change capacity, keeping the newest points.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.points.len() > capacity {
            self.points.pop_front();
        }
    }

    pub fn latest(&self) -> Option<u64> {
        self.points.back().copied()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.points.iter().copied()
    }
}

/// Bottom-anchored column chart, one column per history point starting at the left edge.
pub struct ThroughputChart<'a> {
    history: &'a History,
    scale: u64,
}

impl<'a> ThroughputChart<'a> {
    pub fn new(history: &'a History, scale: u64) -> Self {
        Self { history, scale }
    }
}

impl Widget for ThroughputChart<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }
        let bottom = area.bottom() - 1;
        for (col, value) in self.history.iter().take(area.width as usize).enumerate() {
            let x = area.x + col as u16;
            for row in 0..bar_height(value, self.scale, area.height) {
                buf.get_mut(x, bottom - row).set_symbol(BAR_GLYPH);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_height_floors_and_clamps() {
        assert_eq!(bar_height(0, 100, 10), 0);
        assert_eq!(bar_height(99, 100, 10), 0);
        assert_eq!(bar_height(100, 100, 10), 1);
        assert_eq!(bar_height(1000, 256, 10), 3);
        assert_eq!(bar_height(1_000_000, 100, 10), 10);
        assert_eq!(bar_height(u64::MAX, 256, 7), 7);
        assert_eq!(bar_height(500, 100, 0), 0);
    }

    #[test]
    fn history_keeps_last_capacity_points() {
        let cap = 5;
        for k in 0..4 {
            let mut h = History::new(cap);
            let pushed: Vec<u64> = (0..(cap + k) as u64).collect();
            for v in &pushed {
                h.push(*v);
            }
            assert_eq!(h.len(), cap);
            let tail: Vec<u64> = pushed[pushed.len() - cap..].to_vec();
            assert_eq!(h.iter().collect::<Vec<_>>(), tail);
        }
    }

    #[test]
    fn history_below_capacity_keeps_everything() {
        let mut h = History::new(10);
        h.push(3);
        h.push(4);
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(h.latest(), Some(4));
    }

    #[test]
    fn zero_capacity_history_stays_empty() {
        let mut h = History::new(0);
        h.push(1);
        assert!(h.is_empty());
    }

    #[test]
    fn resize_keeps_newest() {
        let mut h = History::new(6);
        for v in 1..=6 {
            h.push(v);
        }
        h.resize(3);
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![4, 5, 6]);
        h.resize(8);
        h.push(7);
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn chart_draws_bottom_anchored_columns() {
        let mut h = History::new(4);
        h.push(0);
        h.push(250);
        h.push(10_000);
        let area = Rect::new(0, 0, 4, 5);
        let mut buf = Buffer::empty(area);
        ThroughputChart::new(&h, 100).render(area, &mut buf);

        let column = |x: u16| -> Vec<bool> {
            (0..5).map(|y| buf.get(x, y).symbol() == BAR_GLYPH).collect()
        };
        assert_eq!(column(0), vec![false; 5]);
        assert_eq!(column(1), vec![false, false, false, true, true]);
        assert_eq!(column(2), vec![true; 5]);
        assert_eq!(column(3), vec![false; 5]);
    }

    #[test]
    fn chart_respects_area_offset() {
        let mut h = History::new(2);
        h.push(100);
        let area = Rect::new(2, 1, 3, 3);
        let mut buf = Buffer::empty(Rect::new(0, 0, 6, 5));
        ThroughputChart::new(&h, 100).render(area, &mut buf);
        assert_eq!(buf.get(2, 3).symbol(), BAR_GLYPH);
        assert_eq!(buf.get(2, 2).symbol(), " ");
        assert_eq!(buf.get(2, 4).symbol(), " ");
    }
}
