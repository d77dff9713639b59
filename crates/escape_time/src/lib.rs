//! Escape-time coloring strategies for the tile scheduler.
//!
//! Every strategy is a pure function of `(world_x, world_y, iteration_budget)`.
//! Points that stay bounded for the whole budget, and any evaluation that hits a
//! non-finite value, come out as opaque black.

use std::f64::consts::{PI, SQRT_2};

use tiles::{PixelSource, Rgba8};

const JULIA_C: (f64, f64) = (-0.7, 0.27015);
const PHOENIX_P: (f64, f64) = (-0.5, 0.0);
const LYAPUNOV_PATTERN: &[u8] = b"AABAB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FractalSet {
    #[default]
    Mandelbrot,
    Julia,
    BurningShip,
    Tricorn,
    Phoenix,
    Lyapunov,
}

impl FractalSet {
    pub const ALL: [FractalSet; 6] = [
        FractalSet::Mandelbrot,
        FractalSet::Julia,
        FractalSet::BurningShip,
        FractalSet::Tricorn,
        FractalSet::Phoenix,
        FractalSet::Lyapunov,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FractalSet::Mandelbrot => "mandelbrot",
            FractalSet::Julia => "julia",
            FractalSet::BurningShip => "burning_ship",
            FractalSet::Tricorn => "tricorn",
            FractalSet::Phoenix => "phoenix",
            FractalSet::Lyapunov => "lyapunov",
        }
    }

    pub fn color(self, x: f64, y: f64, iteration_budget: u32) -> Rgba8 {
        if !x.is_finite() || !y.is_finite() || iteration_budget == 0 {
            return Rgba8::BLACK;
        }
        let color = match self {
            FractalSet::Mandelbrot => mandelbrot(x, y, iteration_budget),
            FractalSet::Julia => julia(x, y, iteration_budget),
            FractalSet::BurningShip => burning_ship(x, y, iteration_budget),
            FractalSet::Tricorn => tricorn(x, y, iteration_budget),
            FractalSet::Phoenix => phoenix(x, y, iteration_budget),
            FractalSet::Lyapunov => lyapunov(x, y, iteration_budget),
        };
        color.unwrap_or(Rgba8::BLACK)
    }
}

impl PixelSource for FractalSet {
    fn color_at(&self, world_x: f64, world_y: f64, iteration_budget: u32) -> Rgba8 {
        self.color(world_x, world_y, iteration_budget)
    }
}

// Each kernel returns `None` for bounded points and numerical trouble.

fn mandelbrot(ca: f64, cb: f64, budget: u32) -> Option<Rgba8> {
    let (mut a, mut b) = (ca, cb);
    let mut n = 0;
    while a * a + b * b <= 16.0 && n < budget {
        let next_a = a * a - b * b + ca;
        b = 2.0 * a * b + cb;
        a = next_a;
        n += 1;
    }
    if n == budget || !a.is_finite() || !b.is_finite() {
        return None;
    }
    let n = f64::from(n);
    let channel = |factor: f64| ((n * factor) as i64 % 255) as u8;
    Some(Rgba8::opaque(
        channel(PI),
        channel(PI * PI.sqrt()),
        channel(PI * SQRT_2),
    ))
}

fn julia(mut a: f64, mut b: f64, budget: u32) -> Option<Rgba8> {
    let mut n = 0;
    while n < budget && a * a + b * b <= 4.0 {
        let next_a = a * a - b * b + JULIA_C.0;
        b = 2.0 * a * b + JULIA_C.1;
        a = next_a;
        n += 1;
    }
    if n == budget {
        return None;
    }
    let smooth = smooth_count(n, a, b)?;
    let hue = (0.95 + 20.0 * smooth / f64::from(budget)).rem_euclid(1.0);
    hsv_to_rgb(hue, 0.8, 1.0)
}

fn burning_ship(a: f64, b: f64, budget: u32) -> Option<Rgba8> {
    let (mut x, mut y) = (0.0f64, 0.0f64);
    let mut n = 0;
    while x * x + y * y <= 4.0 && n < budget {
        let next_x = x * x - y * y + a;
        y = (2.0 * x * y).abs() + b;
        x = next_x.abs();
        n += 1;
    }
    if n == budget {
        return None;
    }
    Some(polynomial_gradient(f64::from(n) / f64::from(budget)))
}

fn tricorn(a: f64, b: f64, budget: u32) -> Option<Rgba8> {
    let (mut x, mut y) = (0.0f64, 0.0f64);
    let mut n = 0;
    while x * x + y * y <= 4.0 && n < budget {
        let next_x = x * x - y * y + a;
        y = -2.0 * x * y + b;
        x = next_x;
        n += 1;
    }
    if n == budget {
        return None;
    }
    let t = f64::from(n) / f64::from(budget);
    Some(Rgba8::opaque(
        unit_to_u8(255.0 * t),
        unit_to_u8(255.0 * (1.0 - t)),
        unit_to_u8(128.0 * t),
    ))
}

fn phoenix(c_re: f64, c_im: f64, budget: u32) -> Option<Rgba8> {
    let (mut x, mut y) = (0.0f64, 0.0f64);
    let (mut previous_x, mut previous_y) = (0.0f64, 0.0f64);
    let mut n = 0;
    while x * x + y * y <= 4.0 && n < budget {
        let next_x = x * x - y * y + c_re + (PHOENIX_P.0 * previous_x - PHOENIX_P.1 * previous_y);
        let next_y = 2.0 * x * y + c_im + (PHOENIX_P.0 * previous_y + PHOENIX_P.1 * previous_x);
        previous_x = x;
        previous_y = y;
        x = next_x;
        y = next_y;
        n += 1;
    }
    if n == budget {
        return None;
    }
    let smooth = smooth_count(n, x, y)?;
    Some(polynomial_gradient(smooth / f64::from(budget)))
}

fn lyapunov(rate_a: f64, rate_b: f64, budget: u32) -> Option<Rgba8> {
    let mut x = 0.5f64;
    let mut exponent = 0.0f64;
    for n in 0..budget as usize {
        let rate = if LYAPUNOV_PATTERN[n % LYAPUNOV_PATTERN.len()] == b'A' {
            rate_a
        } else {
            rate_b
        };
        x = rate * x * (1.0 - x);
        if x <= 0.0 || x >= 1.0 || !x.is_finite() {
            return None;
        }
        let derivative = (rate * (1.0 - 2.0 * x)).abs();
        if derivative > 0.0 {
            exponent += derivative.ln();
        }
    }
    exponent /= f64::from(budget);
    if !exponent.is_finite() {
        return None;
    }
    let t = ((exponent + 2.0) / 4.0).clamp(0.0, 1.0);
    Some(Rgba8::opaque(
        unit_to_u8(255.0 * t),
        unit_to_u8(200.0 * t.sqrt()),
        unit_to_u8(30.0 * (1.0 - t)),
    ))
}

/// Fractional escape count `n + 1 - log2(log2(|z|))`.
fn smooth_count(n: u32, x: f64, y: f64) -> Option<f64> {
    let modulus = (x * x + y * y).sqrt();
    let smooth = f64::from(n) + 1.0 - modulus.log2().log2();
    smooth.is_finite().then_some(smooth)
}

fn polynomial_gradient(t: f64) -> Rgba8 {
    let u = 1.0 - t;
    Rgba8::opaque(
        unit_to_u8(9.0 * u * t * t * t * 255.0),
        unit_to_u8(15.0 * u * u * t * t * 255.0),
        unit_to_u8(8.5 * u * u * u * t * 255.0),
    )
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Option<Rgba8> {
    if !hue.is_finite() {
        return None;
    }
    let sector = (hue * 6.0).floor();
    let fraction = hue * 6.0 - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - fraction * saturation);
    let t = value * (1.0 - (1.0 - fraction) * saturation);
    let (r, g, b) = match (sector as i64).rem_euclid(6) {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };
    Some(Rgba8::opaque(
        unit_to_u8(r * 255.0),
        unit_to_u8(g * 255.0),
        unit_to_u8(b * 255.0),
    ))
}

fn unit_to_u8(channel: f64) -> u8 {
    channel.clamp(0.0, 255.0) as u8
}
