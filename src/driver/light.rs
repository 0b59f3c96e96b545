//! Addressable LED strip driver.
//!
//! The strip is folded into two arches of equal length: the right arch runs
//! from pixel 0 upward, the left arch from the last pixel downward.

use super::{frame_interval, Animation, Playback};
use crate::bus::BusReceiver;
use crate::clock::millis_since;
use crate::config::schema::LightConfig;
use crate::event::{command_enum, into_u8, LightCmd, LightMsg};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smart_leds::{brightness, SmartLedsWrite, RGB8};
use std::convert::Infallible;
use std::fmt::Debug;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

command_enum! {
    pub enum LightAnim {
        Blank = 0,
        CandyCane = 1,
        Flames = 2,
        Bounce = 3,
        Lightning = 4,
    }
}

into_u8!(LightAnim);

impl Animation for LightAnim {
    const NAME: &'static str = "light";
    const COUNT: u8 = 5;
}

const BLACK: RGB8 = RGB8 { r: 0, g: 0, b: 0 };
const WHITE: RGB8 = RGB8 { r: 255, g: 255, b: 255 };
const CANDY_RED: RGB8 = RGB8 { r: 220, g: 0, b: 0 };
const BOUNCE_HEAD: RGB8 = RGB8 { r: 0, g: 0, b: 255 };

const STRIPE_WIDTH: usize = 3;
const STRIPE_SHIFT_MS: u32 = 90;
const BOUNCE_FADE: u8 = 40;
const FLAME_COOLING: usize = 85;
const FLAME_SPARKING: u8 = 75;

fn scale8(value: u8, scale: u8) -> u8 {
    ((u16::from(value) * (u16::from(scale) + 1)) >> 8) as u8
}

fn fade_to_black(pixels: &mut [RGB8], amount: u8) {
    let keep = 255 - amount;
    for p in pixels {
        *p = RGB8::new(scale8(p.r, keep), scale8(p.g, keep), scale8(p.b, keep));
    }
}

fn add(a: RGB8, b: RGB8) -> RGB8 {
    RGB8::new(
        a.r.saturating_add(b.r),
        a.g.saturating_add(b.g),
        a.b.saturating_add(b.b),
    )
}

/// Black → red → yellow → white ramp.
fn heat_color(heat: u8) -> RGB8 {
    let mut t192 = scale8(heat, 191);
    if heat != 0 && t192 == 0 {
        t192 = 1;
    }
    let ramp = (t192 & 0x3F) << 2;
    if t192 & 0x80 != 0 {
        RGB8::new(255, 255, ramp)
    } else if t192 & 0x40 != 0 {
        RGB8::new(255, ramp, 0)
    } else {
        RGB8::new(ramp, 0, 0)
    }
}

/// One Fire2012 step over a single column, base at index 0.
fn flame_column(heat: &mut [u8], rng: &mut StdRng) {
    let len = heat.len();
    if len == 0 {
        return;
    }
    let max_cooling = (FLAME_COOLING * 10 / len + 2).min(255) as u8;
    for cell in heat.iter_mut() {
        *cell = cell.saturating_sub(rng.gen_range(0..max_cooling));
    }
    for k in (2..len).rev() {
        heat[k] = ((u16::from(heat[k - 1]) + 2 * u16::from(heat[k - 2])) / 3) as u8;
    }
    if rng.gen::<u8>() < FLAME_SPARKING {
        let y = rng.gen_range(0..len.min(7));
        heat[y] = heat[y].saturating_add(rng.gen_range(160..255));
    }
}

#[derive(Debug, Default)]
struct Strike {
    active: bool,
    start: u32,
    speed_px_ms: f32,
    trail: u8,
    strobe: u8,
}

/// Bolts falling from the top of one arch, with a fading afterglow.
#[derive(Debug, Default)]
struct Lightning {
    strike: Strike,
    scheduled_at: u32,
    gap_ms: u32,
    last_fade: u32,
}

impl Lightning {
    const BASE_FADE: u32 = 120;
    const HALO_BLUE_DIV: u8 = 6;

    fn schedule(&mut self, now: u32, rng: &mut StdRng) {
        self.scheduled_at = now;
        self.gap_ms = rng.gen_range(400..=800);
    }

    fn update(&mut self, arch: &mut [RGB8], now: u32, reset: bool, rng: &mut StdRng) {
        if reset {
            arch.fill(BLACK);
            self.strike = Strike::default();
            self.schedule(now, rng);
            self.last_fade = now;
        }

        let dt = now.wrapping_sub(self.last_fade);
        self.last_fade = now;
        fade_to_black(arch, (Self::BASE_FADE.saturating_mul(dt) / 16).min(255) as u8);

        if !self.strike.active && now.wrapping_sub(self.scheduled_at) >= self.gap_ms {
            self.strike = Strike {
                active: true,
                start: now,
                speed_px_ms: f32::from(rng.gen_range(300u16..=900)) / 1000.0,
                trail: rng.gen_range(6..=12),
                strobe: rng.gen_range(0..2),
            };
            self.schedule(now, rng);
        }

        if self.strike.active {
            self.draw(arch, now, rng);
        }
    }

    fn draw(&mut self, arch: &mut [RGB8], now: u32, rng: &mut StdRng) {
        let n = arch.len() as i32;
        if self.strike.strobe > 0 {
            for p in arch.iter_mut() {
                *p = add(*p, RGB8::new(2, 2, 3));
            }
            self.strike.strobe -= 1;
        }

        let elapsed = now.wrapping_sub(self.strike.start) as f32;
        let head = ((n - 1) as f32 - self.strike.speed_px_ms * elapsed).floor() as i32;
        let trail = i32::from(self.strike.trail.max(1));
        if head < -trail {
            self.strike.active = false;
            return;
        }

        for y in head.max(0)..=(head + trail).min(n - 1) {
            let d = y - head;
            let keep = if d <= 2 { 255 } else { 220 - d * 200 / trail };
            if i32::from(rng.gen::<u8>()) > keep {
                continue;
            }
            let b = 255 - scale8(255, (d * 255 / trail) as u8);
            let px = &mut arch[y as usize];
            if y == head {
                *px = WHITE;
            }
            *px = add(*px, RGB8::new(b, b, b));
            *px = add(*px, RGB8::new(0, 0, b / Self::HALO_BLUE_DIV));
        }

        if head < 8 {
            let span = arch.len().min(12);
            for p in &mut arch[..span] {
                *p = add(*p, RGB8::new(3, 3, 6));
            }
        }
    }
}

/// Frame buffer plus per-animation state.
pub struct Renderer {
    frame: Vec<RGB8>,
    rng: StdRng,
    anim_start: u32,
    heat_right: Vec<u8>,
    heat_left: Vec<u8>,
    bounce_pos: usize,
    bounce_forward: bool,
    lightning: Lightning,
}

impl Renderer {
    pub fn new(num_leds: usize, rng: StdRng) -> Self {
        let half = num_leds / 2;
        Self {
            frame: vec![BLACK; num_leds],
            rng,
            anim_start: 0,
            heat_right: vec![0; half],
            heat_left: vec![0; num_leds - half],
            bounce_pos: 0,
            bounce_forward: true,
            lightning: Lightning::default(),
        }
    }

    pub fn frame(&self) -> &[RGB8] {
        &self.frame
    }

    pub fn clear(&mut self) {
        self.frame.fill(BLACK);
    }

    pub fn render(&mut self, anim: LightAnim, reset: bool, now: u32) {
        if reset {
            self.anim_start = now;
        }
        match anim {
            LightAnim::Blank => self.clear(),
            LightAnim::CandyCane => self.candy_cane(now),
            LightAnim::Flames => self.flames(reset),
            LightAnim::Bounce => self.bounce(reset),
            LightAnim::Lightning => self.lightning(reset, now),
        }
    }

    fn candy_cane(&mut self, now: u32) {
        let t = now.wrapping_sub(self.anim_start);
        let offset = (t / STRIPE_SHIFT_MS) as usize % (STRIPE_WIDTH * 2);
        for (i, px) in self.frame.iter_mut().enumerate() {
            *px = if ((i + offset) / STRIPE_WIDTH) & 1 == 1 {
                CANDY_RED
            } else {
                WHITE
            };
        }
    }

    fn flames(&mut self, reset: bool) {
        if reset {
            self.heat_right.fill(0);
            self.heat_left.fill(0);
        }
        flame_column(&mut self.heat_right, &mut self.rng);
        flame_column(&mut self.heat_left, &mut self.rng);

        let n = self.frame.len();
        for (j, &h) in self.heat_right.iter().enumerate() {
            self.frame[j] = heat_color(h);
        }
        for (j, &h) in self.heat_left.iter().enumerate() {
            self.frame[n - 1 - j] = heat_color(h);
        }
    }

    fn bounce(&mut self, reset: bool) {
        if reset {
            self.bounce_pos = 0;
            self.bounce_forward = true;
            self.clear();
        }
        fade_to_black(&mut self.frame, BOUNCE_FADE);
        self.frame[self.bounce_pos] = BOUNCE_HEAD;

        let last = self.frame.len() - 1;
        if self.bounce_forward {
            self.bounce_pos += 1;
            if self.bounce_pos >= last {
                self.bounce_pos = last;
                self.bounce_forward = false;
            }
        } else {
            self.bounce_pos = self.bounce_pos.saturating_sub(1);
            if self.bounce_pos == 0 {
                self.bounce_forward = true;
            }
        }
    }

    fn lightning(&mut self, reset: bool, now: u32) {
        let n = self.frame.len();
        let half = n / 2;
        if reset {
            self.clear();
        }
        self.lightning
            .update(&mut self.frame[..half], now, reset, &mut self.rng);
        for j in 0..half {
            self.frame[n - 1 - j] = self.frame[j];
        }
    }
}

/// LED output with global brightness scaling.
pub struct LightStrip<W> {
    writer: W,
    brightness: u8,
}

impl<W> LightStrip<W>
where
    W: SmartLedsWrite<Color = RGB8>,
    W::Error: Debug,
{
    pub fn new(writer: W, brightness: u8) -> Self {
        Self { writer, brightness }
    }

    pub fn show(&mut self, frame: &[RGB8]) {
        if let Err(e) = self
            .writer
            .write(brightness(frame.iter().copied(), self.brightness))
        {
            warn!("LED write failed: {e:?}");
        }
    }
}

/// Stand-in for the strip when no LED hardware is attached: frames are traced.
#[derive(Debug, Default)]
pub struct TraceWriter {
    frames: u64,
}

impl SmartLedsWrite for TraceWriter {
    type Error = Infallible;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        let lit = iterator
            .into_iter()
            .map(|px| -> RGB8 { px.into() })
            .filter(|px| *px != BLACK)
            .count();
        self.frames += 1;
        trace!(frame = self.frames, lit, "LED frame");
        Ok(())
    }
}

pub struct LightDriver<W> {
    playback: Playback<LightAnim>,
    renderer: Renderer,
    strip: LightStrip<W>,
}

impl<W> LightDriver<W>
where
    W: SmartLedsWrite<Color = RGB8>,
    W::Error: Debug,
{
    pub fn new(config: &LightConfig, writer: W, rng: StdRng) -> Self {
        Self {
            playback: Playback::new(),
            renderer: Renderer::new(config.num_leds, rng),
            strip: LightStrip::new(writer, config.brightness),
        }
    }

    pub fn playing(&self) -> Option<LightAnim> {
        self.playback.current()
    }

    pub fn frame(&self) -> &[RGB8] {
        self.renderer.frame()
    }

    pub fn handle(&mut self, msg: LightMsg) {
        match msg.cmd {
            LightCmd::Play => {
                if let Err(e) = self.playback.play(msg.param) {
                    warn!("{e}");
                }
            }
            LightCmd::Stop => {
                self.playback.stop();
                self.renderer.clear();
                self.strip.show(self.renderer.frame());
            }
            LightCmd::None => {}
        }
    }

    /// Render and push one frame if something is playing.
    pub fn tick(&mut self, now: u32) {
        if let Some((anim, reset)) = self.playback.next_frame() {
            self.renderer.render(anim, reset, now);
            self.strip.show(self.renderer.frame());
        }
    }
}

pub async fn run(
    config: LightConfig,
    mut commands: BusReceiver<LightMsg>,
    cancel: CancellationToken,
) {
    let epoch = Instant::now();
    let mut driver = LightDriver::new(&config, TraceWriter::default(), StdRng::from_entropy());
    let mut interval = frame_interval(config.fps);
    info!(
        "light task started, {} LEDs at {} fps, brightness {}",
        config.num_leds, config.fps, config.brightness
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("light task shutting down");
                return;
            }
            _ = interval.tick() => {}
        }
        for msg in commands.drain() {
            driver.handle(msg);
        }
        driver.tick(millis_since(epoch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        frames: Vec<Vec<RGB8>>,
    }

    impl SmartLedsWrite for Capture {
        type Error = Infallible;
        type Color = RGB8;

        fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
        where
            T: IntoIterator<Item = I>,
            I: Into<Self::Color>,
        {
            self.frames
                .push(iterator.into_iter().map(|px| -> RGB8 { px.into() }).collect());
            Ok(())
        }
    }

    fn driver(num_leds: usize, brightness: u8) -> LightDriver<Capture> {
        let config = LightConfig {
            num_leds,
            brightness,
            ..LightConfig::default()
        };
        LightDriver::new(&config, Capture::default(), StdRng::seed_from_u64(7))
    }

    fn play(d: &mut LightDriver<Capture>, anim: LightAnim) {
        d.handle(LightMsg::new(LightCmd::Play, anim.into()));
    }

    #[test]
    fn candy_cane_stripes_shift() {
        let mut d = driver(12, 255);
        play(&mut d, LightAnim::CandyCane);
        d.tick(1000);
        let frame = d.frame();
        assert!(frame[..3].iter().all(|&p| p == WHITE));
        assert!(frame[3..6].iter().all(|&p| p == CANDY_RED));

        d.tick(1000 + STRIPE_SHIFT_MS);
        assert_eq!(d.frame()[1], WHITE);
        assert_eq!(d.frame()[2], CANDY_RED);
    }

    #[test]
    fn brightness_scales_output() {
        let mut d = driver(6, 128);
        play(&mut d, LightAnim::CandyCane);
        d.tick(0);
        let out = &d.strip.writer.frames[0];
        assert_eq!(d.frame()[0], WHITE);
        assert!(out[0].r < 200 && out[0].r > 100);
    }

    #[test]
    fn stop_blanks_once_then_goes_quiet() {
        let mut d = driver(8, 255);
        play(&mut d, LightAnim::CandyCane);
        d.tick(0);
        d.handle(LightMsg::new(LightCmd::Stop, 0));
        assert!(d.strip.writer.frames[1].iter().all(|&p| p == BLACK));

        d.tick(16);
        d.tick(32);
        assert_eq!(d.strip.writer.frames.len(), 2);
        assert_eq!(d.playing(), None);
    }

    #[test]
    fn invalid_index_is_ignored() {
        let mut d = driver(8, 255);
        play(&mut d, LightAnim::Bounce);
        d.handle(LightMsg::new(LightCmd::Play, 9));
        assert_eq!(d.playing(), Some(LightAnim::Bounce));
    }

    #[test]
    fn bounce_reverses_at_the_end() {
        let mut d = driver(4, 255);
        play(&mut d, LightAnim::Bounce);
        let heads: Vec<usize> = (0..7)
            .map(|i| {
                d.tick(i * 16);
                d.frame().iter().position(|&p| p == BOUNCE_HEAD).unwrap()
            })
            .collect();
        assert_eq!(heads, vec![0, 1, 2, 3, 2, 1, 0]);
    }

    #[test]
    fn flames_light_up_both_arches() {
        let mut d = driver(40, 255);
        play(&mut d, LightAnim::Flames);
        for i in 0..120 {
            d.tick(i * 16);
        }
        let frame = d.frame();
        assert!(frame[..20].iter().any(|&p| p != BLACK));
        assert!(frame[20..].iter().any(|&p| p != BLACK));
    }

    #[test]
    fn lightning_mirrors_arches() {
        let mut d = driver(30, 255);
        play(&mut d, LightAnim::Lightning);
        let mut saw_strike = false;
        for i in 0..200 {
            d.tick(i * 16);
            let frame = d.frame();
            for j in 0..15 {
                assert_eq!(frame[j], frame[29 - j]);
            }
            saw_strike |= frame.iter().any(|&p| p != BLACK);
        }
        assert!(saw_strike);
    }

    #[test]
    fn heat_ramp() {
        assert_eq!(heat_color(0), BLACK);
        assert_eq!(heat_color(255), RGB8::new(255, 255, 252));
        let mid = heat_color(100);
        assert_eq!(mid.r, 255);
        assert_eq!(mid.b, 0);
    }
}
