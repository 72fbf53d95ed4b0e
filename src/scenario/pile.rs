//! The bounding-box scenario (interrupts 598/599).
//!
//! The guest receives a 64×64 pixel field ("pile") packed as 1024 words,
//! one byte per pixel, four pixels per word. Seven rectangular grid
//! "parts" are drawn into it, one per color; the guest must report the
//! bounding box of the target color's pixels as packed byte offsets.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use super::{ScenarioContext, REPORT_SENTINEL};
use crate::emu::{Emulator, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obscurity {
    None,
    Horz,
    Vert,
    Both,
}

impl Obscurity {
    pub fn label(self) -> &'static str {
        match self {
            Obscurity::None => "ObsNone",
            Obscurity::Horz => "ObsHorz",
            Obscurity::Vert => "ObsVert",
            Obscurity::Both => "ObsBoth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spacing {
    None,
    Horz,
    Vert,
    Both,
}

impl Spacing {
    pub fn label(self) -> &'static str {
        match self {
            Spacing::None => "SpaceNone",
            Spacing::Horz => "SpaceHorz",
            Spacing::Vert => "SpaceVert",
            Spacing::Both => "SpaceBoth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    None,
    L,
    T,
}

impl Geometry {
    pub fn label(self) -> &'static str {
        match self {
            Geometry::None => "GeoNone",
            Geometry::L => "GeoL",
            Geometry::T => "GeoT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PilePuzzle {
    pub target_color: u32,
    /// `(tl_y*64 + tl_x) << 16 | (br_y*64 + br_x)`.
    pub solution: u32,
    pub reported_answer: u32,
    pub obscurity: Obscurity,
    pub spacing: Spacing,
    pub geometry: Geometry,
    pub h_line_count: usize,
    pub v_line_count: usize,
    pub pile: Box<[u32; 1024]>,
    // target-part geometry kept for classification
    h_allocs: u64,
    v_allocs: u64,
    h_lines: Vec<i32>,
    v_lines: Vec<i32>,
    tlx: i32,
    tly: i32,
}

fn min_spacing(lines: &[i32]) -> i32 {
    let mut min = 64;
    for (i, &a) in lines.iter().enumerate() {
        for (j, &b) in lines.iter().enumerate() {
            if i != j && (a - b).abs() < min {
                min = (a - b).abs();
            }
        }
    }
    min
}

impl PilePuzzle {
    /// Generate a valid pile for `target_color`, retrying whole fields on
    /// degenerate output (a part with no lines on some axis, or a target
    /// bounding box under 25×25). A watchdog re-seeds the RNG after 100
    /// consecutive field rejections.
    pub fn generate(rng: &mut StdRng, target_color: u32) -> Self {
        let mut p = PilePuzzle {
            target_color,
            solution: 0,
            reported_answer: REPORT_SENTINEL,
            obscurity: Obscurity::None,
            spacing: Spacing::None,
            geometry: Geometry::None,
            h_line_count: 0,
            v_line_count: 0,
            pile: Box::new([0; 1024]),
            h_allocs: 0,
            v_allocs: 0,
            h_lines: Vec::new(),
            v_lines: Vec::new(),
            tlx: 0,
            tly: 0,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            if attempts > 100 {
                attempts = 0;
                warn!("randomization watchdog intervened");
                let reseed: u64 = rng.gen();
                *rng = StdRng::seed_from_u64(reseed);
            }
            if !p.generate_field(rng) {
                continue;
            }
            if p.validate_field() {
                break;
            }
        }
        p
    }

    pub fn point(&self, x: i32, y: i32) -> u32 {
        (self.pile[(y * 16 + x / 4) as usize] >> ((x % 4) * 8)) & 0xFF
    }

    fn plot(&mut self, x: i32, y: i32, color: u32) {
        let idx = (y * 16 + x / 4) as usize;
        let lane = ((x % 4) * 8) as u32;
        self.pile[idx] &= !(0xFF << lane);
        self.pile[idx] |= color << lane;
    }

    fn draw_h_line(&mut self, x1: i32, x2: i32, y: i32, color: u32) {
        for x in x1..=x2 {
            self.plot(x, y, color);
        }
    }

    fn draw_v_line(&mut self, x: i32, y1: i32, y2: i32, color: u32) {
        for y in y1..=y2 {
            self.plot(x, y, color);
        }
    }

    fn h_allocated(&self, y: i32) -> bool {
        (self.h_allocs >> y) & 0x1 != 0
    }

    fn v_allocated(&self, x: i32) -> bool {
        (self.v_allocs >> x) & 0x1 != 0
    }

    /// Draw one part. Parts are drawn in ascending color order, so later
    /// colors may occlude earlier ones. Line placement respects a
    /// one-pixel exclusion band around every previously placed parallel
    /// line, with ten attempts per line before giving up on it.
    fn generate_part(&mut self, rng: &mut StdRng, color: u32, is_target: bool) -> bool {
        let width: i32 = rng.gen_range(25..46);
        let height: i32 = rng.gen_range(25..46);
        let target_v_lines = width / 12;
        let target_h_lines = height / 12;
        let tlx = rng.gen_range(1..63 - width);
        let tly = rng.gen_range(1..63 - height);

        let mut h_lines = Vec::new();
        let mut v_lines = Vec::new();

        for _ in 0..target_h_lines {
            for _ in 0..10 {
                let y = rng.gen_range(0..height) + tly;
                if !self.h_allocated(y) && !self.h_allocated(y - 1) && !self.h_allocated(y + 1) {
                    self.h_allocs |= 0x1 << y;
                    self.draw_h_line(tlx, tlx + width - 1, y, color);
                    h_lines.push(y - tly);
                    break;
                }
            }
        }

        for _ in 0..target_v_lines {
            for _ in 0..10 {
                let x = rng.gen_range(0..width) + tlx;
                if !self.v_allocated(x) && !self.v_allocated(x - 1) && !self.v_allocated(x + 1) {
                    self.v_allocs |= 0x1 << x;
                    self.draw_v_line(x, tly, tly + height - 1, color);
                    v_lines.push(x - tlx);
                    break;
                }
            }
        }

        if v_lines.is_empty() || h_lines.is_empty() {
            // degenerate part; the whole field must be redone
            return false;
        }

        if is_target {
            self.h_line_count = h_lines.len();
            self.v_line_count = v_lines.len();

            self.spacing = match (min_spacing(&h_lines) == 2, min_spacing(&v_lines) == 2) {
                (true, true) => Spacing::Both,
                (true, false) => Spacing::Horz,
                (false, true) => Spacing::Vert,
                (false, false) => Spacing::None,
            };

            // an L has a grid line on both extreme edges of the part's
            // box, a T on exactly one
            let h_extreme = h_lines.iter().any(|&l| l == 0 || l == height - 1);
            let v_extreme = v_lines.iter().any(|&l| l == 0 || l == width - 1);
            self.geometry = match (h_extreme, v_extreme) {
                (true, true) => Geometry::L,
                (false, false) => Geometry::None,
                _ => Geometry::T,
            };

            self.h_lines = h_lines;
            self.v_lines = v_lines;
            self.tlx = tlx;
            self.tly = tly;
        }

        true
    }

    fn generate_field(&mut self, rng: &mut StdRng) -> bool {
        self.pile.fill(0);
        self.h_allocs = 0;
        self.v_allocs = 0;

        for color in 1..=7 {
            if !self.generate_part(rng, color, color == self.target_color) {
                return false;
            }
        }
        true
    }

    /// Brute-force scan for the target color's bounding box; rejects
    /// boxes under 25×25, packs the solution, and classifies obscurity
    /// by whether the target's grid-line endpoints survived occlusion.
    fn validate_field(&mut self) -> bool {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (64, 64, 0, 0);
        for y in 1..63 {
            for x in 1..63 {
                if self.point(x, y) == self.target_color {
                    min_x = min_x.min(x);
                    max_x = max_x.max(x);
                    min_y = min_y.min(y);
                    max_y = max_y.max(y);
                }
            }
        }

        if max_x - min_x + 1 < 25 || max_y - min_y + 1 < 25 {
            return false;
        }

        self.solution = (((min_y * 64 + min_x) as u32) << 16) | ((max_y * 64 + max_x) as u32);

        let target = self.target_color;
        let h_obscured = self.h_lines.iter().any(|&l| {
            let y = l + self.tly;
            self.point(min_x, y) != target || self.point(max_x, y) != target
        });
        let v_obscured = self.v_lines.iter().any(|&l| {
            let x = l + self.tlx;
            self.point(x, min_y) != target || self.point(x, max_y) != target
        });
        self.obscurity = match (h_obscured, v_obscured) {
            (true, true) => Obscurity::Both,
            (true, false) => Obscurity::Horz,
            (false, true) => Obscurity::Vert,
            (false, false) => Obscurity::None,
        };

        true
    }
}

impl Emulator {
    pub(crate) fn swi_pile_setup(&mut self) {
        if !self.regs.is_initialized(1) {
            self.report_error(
                ErrorKind::SoftwareInterruptParameter,
                "register $1 uninitialized for swi 598 call. \
                 $1 should hold the pile memory pointer",
            );
        }

        let target_color = self.rng.gen_range(1..8);
        self.reg_write(3, target_color);

        let puzzle = PilePuzzle::generate(&mut self.rng, target_color);

        let base = self.regs.raw(1);
        for (i, &word) in puzzle.pile.iter().enumerate() {
            self.mem_write(base.wrapping_add(4 * i as u32), word, 0xFFFF_FFFF);
        }

        self.ctx = Some(ScenarioContext::BoundingBox(puzzle));
    }

    pub(crate) fn swi_pile_grade(&mut self) {
        if !matches!(self.ctx, Some(ScenarioContext::BoundingBox(_))) {
            self.report_error(
                ErrorKind::InvalidSoftwareInterrupt,
                "cannot use swi 599 with the previous swi call(s)",
            );
            return;
        }
        if !self.regs.is_initialized(2) {
            self.report_error(
                ErrorKind::SoftwareInterruptParameter,
                "register $2 uninitialized for swi 599 call. $2 should hold the \
                 packed byte offsets of the top left and bottom right corners",
            );
        }

        let reported = self.reg_access(2);
        let solution = match self.ctx.as_mut() {
            Some(ScenarioContext::BoundingBox(p)) => {
                p.reported_answer = reported;
                p.solution
            }
            _ => unreachable!(),
        };

        if (reported & 0xFFFF) > 4096 || (reported >> 16) > 4096 {
            self.report_error(
                ErrorKind::SoftwareInterruptParameterValue,
                format!(
                    "0x{reported:X} is an invalid solution for swi 599. Reported byte \
                     offsets must correspond to a pixel within the image, and the \
                     reported solution reports a number too large to be on the image"
                ),
            );
            return;
        }

        self.reg_write(3, solution);
    }
}
