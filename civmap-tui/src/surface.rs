//! Map surface backed by a ratatui canvas.

use std::collections::BTreeMap;

use civmap_core::{
    model::{Bounds, Coordinates},
    ports::{ClickCallback, MapSurface, MarkerSpec, SurfaceError},
};
use tracing::debug;

/// Nominal width of one terminal cell in pixels, used to turn fit padding into degrees.
const CELL_WIDTH_PX: f64 = 8.0;
/// Smallest span shown when every marker sits on the same spot.
const MIN_SPAN_DEGREES: f64 = 0.01;

#[derive(Debug, PartialEq, Eq)]
/// Handle of one marker drawn on the canvas.
pub(crate) struct CanvasMarker(u64);

pub(crate) struct PlacedMarker {
    pub spec: MarkerSpec,
    on_click: ClickCallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Viewport {
    bounds: Bounds,
    padding: u32,
}

/// Visible longitude and latitude ranges of the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Window {
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
}

impl Window {
    const WORLD: Self = Self {
        x_bounds: [-180.0, 180.0],
        y_bounds: [-90.0, 90.0],
    };
}

#[derive(Default)]
pub(crate) struct CanvasSurface {
    attached: bool,
    markers: BTreeMap<u64, PlacedMarker>,
    next_id: u64,
    viewport: Option<Viewport>,
}

impl CanvasSurface {
    pub(crate) fn markers(&self) -> impl Iterator<Item = &PlacedMarker> {
        self.markers.values()
    }

    /// Activate a marker as if it had been clicked. Returns whether it exists.
    pub(crate) fn click(&self, handle: &CanvasMarker) -> bool {
        let Some(marker) = self.markers.get(&handle.0) else {
            return false;
        };
        (marker.on_click)();
        true
    }

    /// Ranges to draw for a canvas `columns` cells wide.
    pub(crate) fn window(&self, columns: u16) -> Window {
        let Some(viewport) = self.viewport else {
            return Window::WORLD;
        };

        let bounds = viewport.bounds;
        let width_px = (f64::from(columns) * CELL_WIDTH_PX).max(1.0);
        let margin = f64::from(viewport.padding) / width_px;

        let (west, east) = padded(bounds.west, bounds.east, margin);
        let (south, north) = padded(bounds.south, bounds.north, margin);
        Window {
            x_bounds: [west.max(-180.0), east.min(180.0)],
            y_bounds: [south.max(-90.0), north.min(90.0)],
        }
    }

    fn check(&self, position: Coordinates) -> Result<(), SurfaceError> {
        if !self.attached {
            return Err(SurfaceError::Detached);
        }
        if !position.is_valid() {
            return Err(SurfaceError::invalid(position));
        }
        Ok(())
    }
}

fn padded(low: f64, high: f64, margin: f64) -> (f64, f64) {
    let span = (high - low).max(MIN_SPAN_DEGREES);
    let center = (low + high) / 2.0;
    let half = span * (0.5 + margin);
    (center - half, center + half)
}

impl MapSurface for CanvasSurface {
    type Handle = CanvasMarker;

    fn attach(&mut self) -> Result<(), SurfaceError> {
        self.attached = true;
        Ok(())
    }

    fn detach(&mut self) {
        self.attached = false;
        self.markers.clear();
        self.viewport = None;
    }

    fn create_marker(
        &mut self,
        spec: &MarkerSpec,
        on_click: ClickCallback,
    ) -> Result<CanvasMarker, SurfaceError> {
        self.check(spec.position)?;
        self.next_id += 1;
        self.markers.insert(
            self.next_id,
            PlacedMarker {
                spec: spec.clone(),
                on_click,
            },
        );
        Ok(CanvasMarker(self.next_id))
    }

    fn update_marker(
        &mut self,
        handle: &CanvasMarker,
        spec: &MarkerSpec,
        on_click: ClickCallback,
    ) -> Result<(), SurfaceError> {
        self.check(spec.position)?;
        let marker = self
            .markers
            .get_mut(&handle.0)
            .ok_or_else(|| SurfaceError::Rejected(format!("unknown marker {}", handle.0)))?;
        marker.spec = spec.clone();
        marker.on_click = on_click;
        Ok(())
    }

    fn remove_marker(&mut self, handle: CanvasMarker) {
        self.markers.remove(&handle.0);
    }

    fn fit_bounds(&mut self, bounds: &Bounds, padding: u32) {
        debug!(?bounds, padding, "Fitting canvas viewport");
        self.viewport = Some(Viewport {
            bounds: *bounds,
            padding,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use civmap_core::palette::{DEFAULT_COLOR, MarkerStyle};

    use super::*;

    fn spec(latitude: f64, longitude: f64) -> MarkerSpec {
        MarkerSpec {
            position: Coordinates::new(latitude, longitude),
            style: MarkerStyle {
                color: DEFAULT_COLOR,
                glyph: None,
            },
            popup: String::from("popup"),
        }
    }

    fn attached() -> CanvasSurface {
        let mut surface = CanvasSurface::default();
        surface.attach().expect("attach succeeds");
        surface
    }

    #[test]
    fn rejects_markers_outside_the_globe() {
        let mut surface = attached();
        let err = surface
            .create_marker(&spec(91.0, 0.0), Arc::new(|| {}))
            .expect_err("latitude out of range");
        assert!(matches!(err, SurfaceError::InvalidCoordinate { .. }));
        assert_eq!(surface.markers().count(), 0);
    }

    #[test]
    fn rejects_markers_before_attach() {
        let mut surface = CanvasSurface::default();
        let err = surface
            .create_marker(&spec(28.6, 77.2), Arc::new(|| {}))
            .expect_err("not attached");
        assert_eq!(err, SurfaceError::Detached);
    }

    #[test]
    fn click_runs_the_latest_binding() {
        let mut surface = attached();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        let handle = surface
            .create_marker(
                &spec(28.6, 77.2),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("create succeeds");
        let counter = Arc::clone(&second);
        surface
            .update_marker(
                &handle,
                &spec(28.7, 77.2),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("update succeeds");

        assert!(surface.click(&handle));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        surface.remove_marker(handle);
        assert!(!surface.click(&CanvasMarker(1)));
    }

    #[test]
    fn window_defaults_to_the_world() {
        assert_eq!(CanvasSurface::default().window(80), Window::WORLD);
    }

    #[test]
    fn window_pads_fitted_bounds() {
        let mut surface = attached();
        let bounds = Bounds {
            south: 10.0,
            west: 20.0,
            north: 20.0,
            east: 40.0,
        };
        surface.fit_bounds(&bounds, 80);
        // 80px of padding on a 100 column (800px) canvas adds a tenth of the span per side
        let window = surface.window(100);
        assert!((window.x_bounds[0] - 18.0).abs() < 1e-9);
        assert!((window.x_bounds[1] - 42.0).abs() < 1e-9);
        assert!((window.y_bounds[0] - 9.0).abs() < 1e-9);
        assert!((window.y_bounds[1] - 21.0).abs() < 1e-9);
    }

    #[test]
    fn single_point_still_gets_an_area() {
        let mut surface = attached();
        let point = Bounds {
            south: 28.6,
            west: 77.2,
            north: 28.6,
            east: 77.2,
        };
        surface.fit_bounds(&point, 0);
        let window = surface.window(80);
        // the span is rebuilt around the center, so allow for rounding
        let x_span = window.x_bounds[1] - window.x_bounds[0];
        let y_span = window.y_bounds[1] - window.y_bounds[0];
        assert!((x_span - MIN_SPAN_DEGREES).abs() < 1e-9, "x span {x_span}");
        assert!((y_span - MIN_SPAN_DEGREES).abs() < 1e-9, "y span {y_span}");
        assert!(window.x_bounds[0] < 77.2 && 77.2 < window.x_bounds[1]);
        assert!(window.y_bounds[0] < 28.6 && 28.6 < window.y_bounds[1]);
    }

    #[test]
    fn detach_drops_everything() {
        let mut surface = attached();
        surface
            .create_marker(&spec(28.6, 77.2), Arc::new(|| {}))
            .expect("create succeeds");
        surface.detach();
        assert_eq!(surface.markers().count(), 0);
        assert_eq!(surface.window(80), Window::WORLD);
    }
}
