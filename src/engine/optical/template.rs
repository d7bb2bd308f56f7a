//! Printed sheet geometry.
//!
//! The sheet is laid out in PDF points on A4 (595.27 x 841.89, y growing downward) and
//! recognized in a canonical raster 1240 pixels wide. Every coordinate handed out here is
//! already in canonical pixels.

pub(crate) const CANONICAL_WIDTH: u32 = 1240;
pub(crate) const CANONICAL_HEIGHT: u32 = 1754;

const PAGE_WIDTH_PT: f32 = 595.27;
const PAGE_HEIGHT_PT: f32 = 841.89;
const ANCHOR_MARGIN_PT: f32 = 35.0;
const ANCHOR_SIDE_PT: f32 = 10.0;
const MARKER_CENTER_PT: (f32, f32) = (515.27, 80.0);
const MARKER_SIDE_PT: f32 = 100.0;
const BUBBLE_RADIUS_PT: f32 = 8.0;
const FIRST_BUBBLE_PT: (f32, f32) = (105.0, 177.0);
const OPTION_PITCH_PT: f32 = 40.0;
const ROW_PITCH_PT: f32 = 25.0;
const COLUMN_GAP_PT: f32 = 40.0;
const LAST_ROW_PT: f32 = 790.0;
const RIGHT_LIMIT_PT: f32 = 545.0;

/// Reference points used to rectify a photograph, in template order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ReferenceRole {
    TopLeft,
    /// The identity marker's centroid stands in for the missing top-right fiducial.
    TopRight,
    BottomRight,
    BottomLeft,
}

impl ReferenceRole {
    pub(crate) const ALL: [ReferenceRole; 4] =
        [Self::TopLeft, Self::TopRight, Self::BottomRight, Self::BottomLeft];

    pub(crate) const FIDUCIALS: [ReferenceRole; 3] =
        [Self::TopLeft, Self::BottomRight, Self::BottomLeft];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SheetTemplate {
    option_count: usize,
}

impl SheetTemplate {
    pub(crate) fn new(option_count: usize) -> Self {
        Self { option_count: option_count.max(1) }
    }

    pub(crate) fn scale() -> f32 {
        CANONICAL_WIDTH as f32 / PAGE_WIDTH_PT
    }

    pub(crate) fn option_count(&self) -> usize {
        self.option_count
    }

    pub(crate) fn reference_point(&self, role: ReferenceRole) -> (f32, f32) {
        let (x, y) = match role {
            ReferenceRole::TopLeft => (ANCHOR_MARGIN_PT, ANCHOR_MARGIN_PT),
            ReferenceRole::TopRight => MARKER_CENTER_PT,
            ReferenceRole::BottomRight => {
                (PAGE_WIDTH_PT - ANCHOR_MARGIN_PT, PAGE_HEIGHT_PT - ANCHOR_MARGIN_PT)
            }
            ReferenceRole::BottomLeft => (ANCHOR_MARGIN_PT, PAGE_HEIGHT_PT - ANCHOR_MARGIN_PT),
        };
        to_px(x, y)
    }

    pub(crate) fn anchor_side(&self) -> f32 {
        ANCHOR_SIDE_PT * Self::scale()
    }

    pub(crate) fn marker_side(&self) -> f32 {
        MARKER_SIDE_PT * Self::scale()
    }

    /// `(min_x, min_y, max_x, max_y)` of the printed identity marker.
    pub(crate) fn marker_bounds(&self) -> (f32, f32, f32, f32) {
        let (cx, cy) = self.reference_point(ReferenceRole::TopRight);
        let half = self.marker_side() / 2.0;
        (cx - half, cy - half, cx + half, cy + half)
    }

    pub(crate) fn bubble_radius(&self) -> f32 {
        BUBBLE_RADIUS_PT * Self::scale()
    }

    pub(crate) fn rows_per_column(&self) -> usize {
        ((LAST_ROW_PT - FIRST_BUBBLE_PT.1) / ROW_PITCH_PT).floor() as usize + 1
    }

    fn column_stride_pt(&self) -> f32 {
        self.option_count as f32 * OPTION_PITCH_PT + COLUMN_GAP_PT
    }

    pub(crate) fn columns(&self) -> usize {
        let span = (self.option_count - 1) as f32 * OPTION_PITCH_PT;
        let stride = self.column_stride_pt();
        let mut columns = 0;
        while FIRST_BUBBLE_PT.0 + columns as f32 * stride + span <= RIGHT_LIMIT_PT {
            columns += 1;
        }
        columns.max(1)
    }

    /// Positions one sheet can carry.
    pub(crate) fn capacity(&self) -> usize {
        self.columns() * self.rows_per_column()
    }

    /// Column and row of a 1-based booklet position.
    pub(crate) fn slot(&self, position: u32) -> (usize, usize) {
        let index = position.saturating_sub(1) as usize;
        (index / self.rows_per_column(), index % self.rows_per_column())
    }

    pub(crate) fn position(&self, column: usize, row: usize) -> u32 {
        (column * self.rows_per_column() + row + 1) as u32
    }

    pub(crate) fn bubble_center(&self, position: u32, option: usize) -> (f32, f32) {
        let (column, row) = self.slot(position);
        to_px(
            FIRST_BUBBLE_PT.0
                + column as f32 * self.column_stride_pt()
                + option as f32 * OPTION_PITCH_PT,
            FIRST_BUBBLE_PT.1 + row as f32 * ROW_PITCH_PT,
        )
    }

    /// Canonical x where column `column` ends and the next begins.
    pub(crate) fn column_boundary(&self, column: usize) -> f32 {
        let last = FIRST_BUBBLE_PT.0
            + column as f32 * self.column_stride_pt()
            + (self.option_count - 1) as f32 * OPTION_PITCH_PT;
        let next = FIRST_BUBBLE_PT.0 + (column + 1) as f32 * self.column_stride_pt();
        (last + next) / 2.0 * Self::scale()
    }

    pub(crate) fn column_of(&self, x: f32) -> usize {
        (0..self.columns().saturating_sub(1))
            .find(|column| x < self.column_boundary(*column))
            .unwrap_or(self.columns() - 1)
    }
}

fn to_px(x: f32, y: f32) -> (f32, f32) {
    (x * SheetTemplate::scale(), y * SheetTemplate::scale())
}
