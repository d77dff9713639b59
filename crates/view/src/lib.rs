use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub const ZERO: Generation = Generation(0);

    pub fn next(self) -> Generation {
        Generation(
            self.0
                .checked_add(1)
                .unwrap_or_else(|| panic!("generation counter overflow at {}", self.0)),
        )
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "g{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewError {
    InvalidScale,
    InvalidViewport,
    NonFiniteValue,
}

impl fmt::Display for ViewError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewError::InvalidScale => write!(formatter, "view scale must be finite and positive"),
            ViewError::InvalidViewport => {
                write!(formatter, "viewport width and height must be at least 1")
            }
            ViewError::NonFiniteValue => write!(formatter, "view math produced a non-finite value"),
        }
    }
}

impl std::error::Error for ViewError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Result<Self, ViewError> {
        if width == 0 || height == 0 {
            return Err(ViewError::InvalidViewport);
        }
        Ok(Self { width, height })
    }

    pub fn half_width(&self) -> f64 {
        f64::from(self.width) / 2.0
    }

    pub fn half_height(&self) -> f64 {
        f64::from(self.height) / 2.0
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 900,
        }
    }
}

/// Center of the view in world space plus `scale` in screen pixels per world unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    center_x: f64,
    center_y: f64,
    scale: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            scale: 500.0,
        }
    }
}

impl Camera {
    pub fn new(center_x: f64, center_y: f64, scale: f64) -> Result<Self, ViewError> {
        if !center_x.is_finite() || !center_y.is_finite() {
            return Err(ViewError::NonFiniteValue);
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ViewError::InvalidScale);
        }
        Ok(Self {
            center_x,
            center_y,
            scale,
        })
    }

    pub fn center_x(&self) -> f64 {
        self.center_x
    }

    pub fn center_y(&self) -> f64 {
        self.center_y
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pan_by(&mut self, delta_x: f64, delta_y: f64) -> Result<(), ViewError> {
        let next_x = checked_add(self.center_x, delta_x)?;
        let next_y = checked_add(self.center_y, delta_y)?;
        self.center_x = next_x;
        self.center_y = next_y;
        Ok(())
    }

    pub fn zoom_by(&mut self, zoom_factor: f64) -> Result<(), ViewError> {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            return Err(ViewError::InvalidScale);
        }
        let next_scale = checked_mul(self.scale, zoom_factor)?;
        if next_scale <= 0.0 {
            return Err(ViewError::InvalidScale);
        }
        self.scale = next_scale;
        Ok(())
    }

    pub fn screen_to_world(&self, viewport: Viewport, screen_x: f64, screen_y: f64) -> (f64, f64) {
        (
            (screen_x - viewport.half_width()) / self.scale + self.center_x,
            (screen_y - viewport.half_height()) / self.scale + self.center_y,
        )
    }

    pub fn world_to_screen(&self, viewport: Viewport, world_x: f64, world_y: f64) -> (f64, f64) {
        (
            (world_x - self.center_x) * self.scale + viewport.half_width(),
            (world_y - self.center_y) * self.scale + viewport.half_height(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRequest {
    pub camera: Camera,
    pub iteration_budget: u32,
    pub generation: Generation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl WorldRect {
    pub fn from_pixel_rect(
        camera: &Camera,
        viewport: Viewport,
        pixel_x: u32,
        pixel_y: u32,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Self {
        let (min_x, min_y) =
            camera.screen_to_world(viewport, f64::from(pixel_x), f64::from(pixel_y));
        let (max_x, max_y) = camera.screen_to_world(
            viewport,
            f64::from(pixel_x) + f64::from(pixel_width),
            f64::from(pixel_y) + f64::from(pixel_height),
        );
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn project(&self, camera: &Camera, viewport: Viewport) -> ScreenRect {
        let (start_x, start_y) = camera.world_to_screen(viewport, self.min_x, self.min_y);
        let (end_x, end_y) = camera.world_to_screen(viewport, self.max_x, self.max_y);
        ScreenRect {
            x: start_x as f32,
            y: start_y as f32,
            width: (end_x - start_x) as f32,
            height: (end_y - start_y) as f32,
        }
    }
}

/// Decides when a camera moved far enough to warrant a new generation.
///
/// This lives with the caller's input handling; the scheduler itself never
/// filters view changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    pub position_threshold: f64,
    pub zoom_threshold: f64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            position_threshold: 0.25,
            zoom_threshold: 0.25,
        }
    }
}

impl RefreshPolicy {
    pub fn is_significant(&self, previous: &ViewRequest, camera: &Camera, iteration_budget: u32) -> bool {
        if previous.iteration_budget != iteration_budget {
            return true;
        }
        let accepted_shift = 1000.0 * self.position_threshold / camera.scale();
        let previous_camera = previous.camera;
        if (camera.center_x() - previous_camera.center_x()).abs() >= accepted_shift
            || (camera.center_y() - previous_camera.center_y()).abs() >= accepted_shift
        {
            return true;
        }
        (1.0 - camera.scale() / previous_camera.scale()).abs() >= self.zoom_threshold
    }
}

fn checked_add(current: f64, delta: f64) -> Result<f64, ViewError> {
    if !delta.is_finite() {
        return Err(ViewError::NonFiniteValue);
    }
    let next = current + delta;
    if !next.is_finite() {
        return Err(ViewError::NonFiniteValue);
    }
    Ok(next)
}

fn checked_mul(left: f64, right: f64) -> Result<f64, ViewError> {
    if !left.is_finite() || !right.is_finite() {
        return Err(ViewError::NonFiniteValue);
    }
    let next = left * right;
    if !next.is_finite() {
        return Err(ViewError::NonFiniteValue);
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(camera: Camera, iteration_budget: u32) -> ViewRequest {
        ViewRequest {
            camera,
            iteration_budget,
            generation: Generation(1),
        }
    }

    #[test]
    fn screen_world_round_trip_keeps_viewport_center_on_camera_center() {
        let viewport = Viewport::new(800, 600).expect("viewport");
        let camera = Camera::new(-0.5, 0.25, 200.0).expect("camera");

        let (world_x, world_y) = camera.screen_to_world(viewport, 400.0, 300.0);
        assert!((world_x + 0.5).abs() < 1e-12);
        assert!((world_y - 0.25).abs() < 1e-12);

        let (screen_x, screen_y) = camera.world_to_screen(viewport, world_x + 1.0, world_y);
        assert!((screen_x - 600.0).abs() < 1e-9);
        assert!((screen_y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn camera_rejects_invalid_inputs() {
        assert_eq!(Camera::new(0.0, 0.0, 0.0), Err(ViewError::InvalidScale));
        assert_eq!(Camera::new(f64::NAN, 0.0, 1.0), Err(ViewError::NonFiniteValue));
        assert_eq!(Viewport::new(0, 10), Err(ViewError::InvalidViewport));

        let mut camera = Camera::default();
        assert_eq!(camera.zoom_by(-2.0), Err(ViewError::InvalidScale));
        assert_eq!(camera.pan_by(f64::INFINITY, 0.0), Err(ViewError::NonFiniteValue));
        assert_eq!(camera, Camera::default());
    }

    #[test]
    fn projecting_a_stale_rect_follows_the_live_camera() {
        let viewport = Viewport::new(100, 100).expect("viewport");
        let computed_under = Camera::new(0.0, 0.0, 10.0).expect("camera");
        let world = WorldRect::from_pixel_rect(&computed_under, viewport, 50, 50, 10, 10);
        assert!((world.min_x - 0.0).abs() < 1e-12);
        assert!((world.max_x - 1.0).abs() < 1e-12);

        let mut live = computed_under;
        live.pan_by(0.5, 0.0).expect("pan");
        live.zoom_by(2.0).expect("zoom");
        let placement = world.project(&live, viewport);

        assert!((placement.x - 40.0).abs() < 1e-4);
        assert!((placement.y - 50.0).abs() < 1e-4);
        assert!((placement.width - 20.0).abs() < 1e-4);
        assert!((placement.height - 20.0).abs() < 1e-4);
    }

    #[test]
    fn refresh_policy_triggers_on_pan_zoom_and_budget_changes() {
        let policy = RefreshPolicy::default();
        let base = Camera::new(0.0, 0.0, 1000.0).expect("camera");
        let previous = request(base, 100);

        assert!(!policy.is_significant(&previous, &base, 100));
        assert!(policy.is_significant(&previous, &base, 200));

        let small_pan = Camera::new(0.1, 0.0, 1000.0).expect("camera");
        assert!(!policy.is_significant(&previous, &small_pan, 100));
        let large_pan = Camera::new(0.3, 0.0, 1000.0).expect("camera");
        assert!(policy.is_significant(&previous, &large_pan, 100));

        let zoomed = Camera::new(0.0, 0.0, 1300.0).expect("camera");
        assert!(policy.is_significant(&previous, &zoomed, 100));
    }

    #[test]
    fn generation_orders_and_advances() {
        let first = Generation::ZERO.next();
        assert_eq!(first, Generation(1));
        assert!(first.next() > first);
        assert_eq!(first.to_string(), "g1");
    }
}
