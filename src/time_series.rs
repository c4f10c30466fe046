/// WPM at a point in the session, `t` in seconds since start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSeriesPoint {
    pub t: f64,
    pub wpm: f64,
}

impl TimeSeriesPoint {
    pub fn new(t: f64, wpm: f64) -> Self {
        Self { t, wpm }
    }
}

impl From<TimeSeriesPoint> for (f64, f64) {
    fn from(p: TimeSeriesPoint) -> Self {
        (p.t, p.wpm)
    }
}

/// X (seconds) and Y (WPM) upper bounds for plotting `points`.
///
/// Both are at least 1 so an empty or instant session still gets a drawable
/// axis.
pub fn chart_bounds(points: &[TimeSeriesPoint]) -> (f64, f64) {
    let highest_wpm = points.iter().map(|p| p.wpm).fold(0.0_f64, f64::max);
    let duration = points.last().map(|p| p.t).unwrap_or(1.0);

    (duration.max(1.0), highest_wpm.round().max(1.0))
}

/// Axis label without a trailing ".00" on whole numbers
pub fn format_label(val: f64) -> String {
    if (val - val.round()).abs() < f64::EPSILON {
        format!("{}", val.round())
    } else {
        format!("{val:.2}")
    }
}
