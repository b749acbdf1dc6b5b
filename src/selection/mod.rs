mod error;
mod machine;
mod transform;

use std::sync::Arc;

use kurbo::{Point, Rect, Vec2};

use crate::config::SelectionSettings;
use crate::geometry::{CanvasSize, PixelPoint, PixelRect};
use crate::layer::LayerId;
use crate::raster::{BlendMode, RasterBuffer};

pub use error::{SelectionError, SelectionResult};
pub use machine::{PhaseTransition, SelectionEvent, SelectionMachine, SelectionPhase};
pub use transform::{
    covering_pixel_rect, pixel_rect_to_kurbo, render_transformed, DisplayMapping,
    SelectionTransform, TransformedPixels,
};

const DRAG_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformMode {
    #[default]
    None,
    Move,
    Rotate,
    Resize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// What a pointer at a display position would grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitZone {
    Rotate,
    Resize(Corner),
    Move,
    Outside,
}

impl HitZone {
    pub const fn mode(self) -> TransformMode {
        match self {
            Self::Rotate => TransformMode::Rotate,
            Self::Resize(_) => TransformMode::Resize,
            Self::Move => TransformMode::Move,
            Self::Outside => TransformMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Marquee was too small; nothing was cut.
    Discarded,
    /// Pixels inside the rectangle were lifted off the layer.
    Captured(PixelRect),
}

/// A lifted region and its pending transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionState {
    pub layer_id: LayerId,
    /// Transformed bounds in display space.
    pub bounds: Rect,
    /// Where the pixels were cut from, in raster space.
    pub image_bounds: PixelRect,
    pub original: Arc<RasterBuffer>,
    /// Transformed pixels covering `placed_bounds`.
    pub transformed: Option<Arc<RasterBuffer>>,
    /// Full extent of the transformed region, possibly reaching past the canvas.
    pub transformed_bounds: PixelRect,
    /// Part of `transformed_bounds` inside the canvas.
    pub placed_bounds: PixelRect,
    pub canvas: CanvasSize,
    pub transform: SelectionTransform,
    pub mode: TransformMode,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionSummary {
    pub phase: SelectionPhase,
    pub layer_id: Option<LayerId>,
    pub marquee: Option<PixelRect>,
    pub image_bounds: Option<PixelRect>,
    pub transformed_bounds: Option<PixelRect>,
    pub display_bounds: Option<Rect>,
    pub transform: SelectionTransform,
    pub mode: TransformMode,
}

#[derive(Debug, Clone, Copy)]
struct DragStart {
    pointer: Point,
    transform: SelectionTransform,
}

#[derive(Debug)]
pub struct SelectionEngine {
    settings: SelectionSettings,
    mapping: DisplayMapping,
    machine: SelectionMachine,
    anchor: Option<Point>,
    marquee: Option<PixelRect>,
    state: Option<SelectionState>,
    drag: Option<DragStart>,
}

impl SelectionEngine {
    pub fn new(settings: SelectionSettings) -> Self {
        Self {
            settings,
            mapping: DisplayMapping::default(),
            machine: SelectionMachine::new(),
            anchor: None,
            marquee: None,
            state: None,
            drag: None,
        }
    }

    pub const fn settings(&self) -> &SelectionSettings {
        &self.settings
    }

    pub const fn mapping(&self) -> DisplayMapping {
        self.mapping
    }

    pub fn set_display_mapping(&mut self, mapping: DisplayMapping) {
        self.mapping = mapping;
        if let Some(state) = self.state.as_mut() {
            state.bounds = mapping.rect_to_display(pixel_rect_to_kurbo(state.transformed_bounds));
        }
    }

    pub fn phase(&self) -> SelectionPhase {
        self.machine.phase()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn can_apply(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.transformed.is_some())
    }

    pub fn state(&self) -> Option<&SelectionState> {
        self.state.as_ref()
    }

    pub fn marquee(&self) -> Option<PixelRect> {
        self.marquee
    }

    pub fn start_selection(&mut self, point: Point) -> SelectionResult<()> {
        self.machine.transition(SelectionEvent::Start)?;
        let anchor = self.mapping.to_raster(point);
        self.anchor = Some(anchor);
        self.marquee = Some(marquee_rect(anchor, anchor));
        Ok(())
    }

    pub fn update_selection(&mut self, point: Point) -> SelectionResult<PixelRect> {
        self.machine.ensure(SelectionPhase::Selecting)?;
        let current = self.mapping.to_raster(point);
        let rect = marquee_rect(self.anchor.unwrap_or(current), current);
        self.marquee = Some(rect);
        Ok(rect)
    }

    /// The rectangle [`end_selection`](Self::end_selection) would cut, if any.
    pub fn pending_capture(&self, canvas: CanvasSize) -> Option<PixelRect> {
        if self.machine.phase() != SelectionPhase::Selecting {
            return None;
        }
        self.marquee?
            .clamped_to(canvas)
            .filter(|rect| rect.width > 1 && rect.height > 1)
    }

    /// Abandons the marquee without cutting anything.
    pub fn cancel_selection(&mut self) -> SelectionResult<SelectionOutcome> {
        self.machine.transition(SelectionEvent::Cancel)?;
        self.anchor = None;
        self.marquee = None;
        Ok(SelectionOutcome::Discarded)
    }

    /// Finishes the marquee and cuts its pixels out of `layer`.
    pub fn end_selection(
        &mut self,
        layer_id: LayerId,
        layer: &mut RasterBuffer,
    ) -> SelectionResult<SelectionOutcome> {
        self.machine.ensure(SelectionPhase::Selecting)?;
        let pending = self.pending_capture(layer.size());
        self.anchor = None;
        self.marquee = None;

        let Some(bounds) = pending else {
            self.machine.transition(SelectionEvent::Cancel)?;
            tracing::debug!("degenerate selection discarded");
            return Ok(SelectionOutcome::Discarded);
        };

        let original = Arc::new(layer.copy_region(bounds));
        layer.clear_rect(bounds);
        self.machine.transition(SelectionEvent::Capture)?;
        self.state = Some(SelectionState {
            layer_id,
            bounds: self.mapping.rect_to_display(pixel_rect_to_kurbo(bounds)),
            image_bounds: bounds,
            transformed: Some(Arc::clone(&original)),
            original,
            transformed_bounds: bounds,
            placed_bounds: bounds,
            canvas: layer.size(),
            transform: SelectionTransform::IDENTITY,
            mode: TransformMode::None,
            active: true,
        });
        tracing::debug!(layer_id = %layer_id, bounds = ?bounds, "selection captured");
        Ok(SelectionOutcome::Captured(bounds))
    }

    pub fn set_rotation(&mut self, degrees: f64) -> SelectionResult<PixelRect> {
        self.update_transform(|transform| transform.rotation = normalize_degrees(degrees))
    }

    pub fn set_scale(&mut self, scale: f64) -> SelectionResult<PixelRect> {
        let min_scale = self.settings.min_scale;
        self.update_transform(|transform| {
            if scale.is_finite() {
                transform.scale = scale.max(min_scale);
            }
        })
    }

    pub fn set_offset(&mut self, offset: Vec2) -> SelectionResult<PixelRect> {
        self.update_transform(|transform| transform.offset = offset)
    }

    fn update_transform<F>(&mut self, update: F) -> SelectionResult<PixelRect>
    where
        F: FnOnce(&mut SelectionTransform),
    {
        let mapping = self.mapping;
        let state = self.state_mut()?;
        update(&mut state.transform);
        retransform(state, &mapping);
        Ok(state.transformed_bounds)
    }

    fn state_mut(&mut self) -> SelectionResult<&mut SelectionState> {
        self.machine.ensure(SelectionPhase::Transforming)?;
        let actual = self.machine.phase();
        self.state.as_mut().ok_or(SelectionError::WrongPhase {
            expected: SelectionPhase::Transforming,
            actual,
        })
    }

    pub fn hit_test(&self, point: Point) -> HitZone {
        let Some(state) = self.state.as_ref() else {
            return HitZone::Outside;
        };
        let bounds = state.bounds;
        let radius = self.settings.handle_radius;
        let rotate_handle = Point::new(
            bounds.center().x,
            bounds.y0 - self.settings.rotate_handle_offset,
        );
        if point.distance(rotate_handle) <= radius {
            return HitZone::Rotate;
        }
        let corners = [
            (Corner::TopLeft, Point::new(bounds.x0, bounds.y0)),
            (Corner::TopRight, Point::new(bounds.x1, bounds.y0)),
            (Corner::BottomLeft, Point::new(bounds.x0, bounds.y1)),
            (Corner::BottomRight, Point::new(bounds.x1, bounds.y1)),
        ];
        if let Some((corner, _)) = corners
            .iter()
            .find(|(_, handle)| point.distance(*handle) <= radius)
        {
            return HitZone::Resize(*corner);
        }
        if bounds.contains(point) {
            HitZone::Move
        } else {
            HitZone::Outside
        }
    }

    /// Starts a drag at `point`. `HitZone::Outside` starts nothing; callers
    /// usually treat it as a request to commit.
    pub fn begin_transform(&mut self, point: Point) -> SelectionResult<HitZone> {
        let zone = self.hit_test(point);
        let pointer = self.mapping.to_raster(point);
        let state = self.state_mut()?;
        state.mode = zone.mode();
        if zone == HitZone::Outside {
            return Ok(zone);
        }
        let transform = state.transform;
        self.drag = Some(DragStart { pointer, transform });
        Ok(zone)
    }

    pub fn drag_transform(&mut self, point: Point) -> SelectionResult<PixelRect> {
        let drag = self.drag.ok_or(SelectionError::NoActiveDrag)?;
        let mapping = self.mapping;
        let min_scale = self.settings.min_scale;
        let state = self.state_mut()?;

        let pointer = mapping.to_raster(point);
        let pivot = pixel_rect_to_kurbo(state.image_bounds).center() + drag.transform.offset;
        let start = drag.pointer - pivot;
        let now = pointer - pivot;
        match state.mode {
            TransformMode::Move => {
                state.transform.offset = drag.transform.offset + (pointer - drag.pointer);
            }
            TransformMode::Rotate => {
                let delta = (now.atan2() - start.atan2()).to_degrees();
                state.transform.rotation = normalize_degrees(drag.transform.rotation + delta);
            }
            TransformMode::Resize => {
                let start_distance = start.hypot();
                if start_distance > DRAG_EPSILON {
                    state.transform.scale =
                        (drag.transform.scale * now.hypot() / start_distance).max(min_scale);
                }
            }
            TransformMode::None => return Err(SelectionError::NoActiveDrag),
        }
        retransform(state, &mapping);
        Ok(state.transformed_bounds)
    }

    pub fn end_transform(&mut self) -> SelectionResult<()> {
        let state = self.state_mut()?;
        state.mode = TransformMode::None;
        self.drag = None;
        Ok(())
    }

    /// Draws the transformed pixels onto `target` and ends the selection.
    ///
    /// Without an active selection this is a no-op returning `Ok(None)`.
    pub fn apply(&mut self, target: &mut RasterBuffer) -> SelectionResult<Option<PixelRect>> {
        if !self.can_apply() {
            return Ok(None);
        }
        self.machine.transition(SelectionEvent::Apply)?;
        self.drag = None;
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        let Some(buffer) = state.transformed else {
            return Ok(None);
        };
        let bounds = state.placed_bounds;
        let dirty = target.draw_image(&buffer, bounds.x, bounds.y, 1.0, BlendMode::Normal);
        tracing::debug!(layer_id = %state.layer_id, bounds = ?bounds, "selection applied");
        Ok(dirty)
    }

    /// Puts the original pixels back where they were cut from.
    pub fn discard(&mut self, target: &mut RasterBuffer) -> SelectionResult<Option<PixelRect>> {
        if self.state.is_none() {
            return Ok(None);
        }
        self.machine.transition(SelectionEvent::Discard)?;
        self.drag = None;
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        let bounds = state.image_bounds;
        let restored = target.blit(&state.original, bounds.x, bounds.y);
        tracing::debug!(layer_id = %state.layer_id, bounds = ?bounds, "selection discarded");
        Ok(restored)
    }

    /// Replaces the current selection with `floating`, as captured by an undo snapshot.
    pub fn restore(&mut self, floating: Option<SelectionState>) -> SelectionResult<()> {
        self.reset();
        let Some(mut state) = floating else {
            return Ok(());
        };
        self.machine.transition(SelectionEvent::Start)?;
        self.machine.transition(SelectionEvent::Capture)?;
        state.mode = TransformMode::None;
        state.bounds = self
            .mapping
            .rect_to_display(pixel_rect_to_kurbo(state.transformed_bounds));
        tracing::debug!(layer_id = %state.layer_id, "floating selection restored");
        self.state = Some(state);
        Ok(())
    }

    /// Forgets any selection without touching pixels.
    pub fn reset(&mut self) {
        let _ = self.machine.transition(SelectionEvent::Reset);
        self.anchor = None;
        self.marquee = None;
        self.state = None;
        self.drag = None;
    }

    pub fn summary(&self) -> SelectionSummary {
        let state = self.state.as_ref();
        SelectionSummary {
            phase: self.machine.phase(),
            layer_id: state.map(|state| state.layer_id),
            marquee: self.marquee,
            image_bounds: state.map(|state| state.image_bounds),
            transformed_bounds: state.map(|state| state.transformed_bounds),
            display_bounds: state.map(|state| state.bounds),
            transform: state.map_or(SelectionTransform::IDENTITY, |state| state.transform),
            mode: state.map_or(TransformMode::None, |state| state.mode),
        }
    }
}

fn marquee_rect(anchor: Point, current: Point) -> PixelRect {
    let min_x = anchor.x.min(current.x).round() as i32;
    let min_y = anchor.y.min(current.y).round() as i32;
    let max_x = anchor.x.max(current.x).round() as i32;
    let max_y = anchor.y.max(current.y).round() as i32;
    PixelRect::new(min_x, min_y, (max_x - min_x) as u32, (max_y - min_y) as u32)
}

fn normalize_degrees(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}

fn retransform(state: &mut SelectionState, mapping: &DisplayMapping) {
    let origin = PixelPoint::new(state.image_bounds.x, state.image_bounds.y);
    if state.transform.is_identity() {
        state.transformed = Some(Arc::clone(&state.original));
        state.transformed_bounds = state.image_bounds;
        state.placed_bounds = state.image_bounds;
    } else {
        let TransformedPixels {
            buffer,
            bounds,
            placed,
        } = render_transformed(&state.original, origin, &state.transform, state.canvas);
        state.transformed = Some(Arc::new(buffer));
        state.transformed_bounds = bounds;
        state.placed_bounds = placed;
    }
    state.bounds = mapping.rect_to_display(pixel_rect_to_kurbo(state.transformed_bounds));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Color;

    const CANVAS: CanvasSize = CanvasSize::new(64, 64);

    fn engine() -> SelectionEngine {
        SelectionEngine::new(SelectionSettings::default())
    }

    fn layer_with_block(rect: PixelRect) -> RasterBuffer {
        let mut layer = RasterBuffer::new(CANVAS);
        layer.fill_rect(rect, Color::rgb(200, 40, 40));
        layer
    }

    fn capture(
        engine: &mut SelectionEngine,
        layer: &mut RasterBuffer,
        from: (f64, f64),
        to: (f64, f64),
    ) -> SelectionOutcome {
        engine
            .start_selection(Point::new(from.0, from.1))
            .expect("start selection");
        engine
            .update_selection(Point::new(to.0, to.1))
            .expect("update selection");
        engine
            .end_selection(LayerId(1), layer)
            .expect("end selection")
    }

    #[test]
    fn marquee_normalizes_drag_direction() {
        let mut engine = engine();
        engine
            .start_selection(Point::new(30.0, 25.0))
            .expect("start selection");
        let rect = engine
            .update_selection(Point::new(10.0, 5.0))
            .expect("update selection");
        assert_eq!(rect, PixelRect::new(10, 5, 20, 20));
    }

    #[test]
    fn degenerate_selection_is_discarded_without_touching_pixels() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(0, 0, 64, 64));
        let before = layer.clone();

        let outcome = capture(&mut engine, &mut layer, (5.0, 5.0), (6.0, 40.0));
        assert_eq!(outcome, SelectionOutcome::Discarded);
        assert_eq!(engine.phase(), SelectionPhase::Inactive);
        assert!(!engine.is_active());
        assert_eq!(layer, before);
    }

    #[test]
    fn capture_cuts_the_region_from_the_layer() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));

        let outcome = capture(&mut engine, &mut layer, (10.0, 10.0), (30.0, 30.0));
        assert_eq!(outcome, SelectionOutcome::Captured(PixelRect::new(10, 10, 20, 20)));
        assert_eq!(engine.phase(), SelectionPhase::Transforming);
        assert!(layer.is_transparent());

        let state = engine.state().expect("selection active");
        assert_eq!(state.original.pixel(0, 0), Some(Color::rgb(200, 40, 40)));
        assert_eq!(state.transform, SelectionTransform::IDENTITY);
    }

    #[test]
    fn quarter_turn_swaps_bounds_about_center() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));
        capture(&mut engine, &mut layer, (10.0, 10.0), (30.0, 30.0));
        let bounds = engine.set_rotation(90.0).expect("rotate");
        assert_eq!(bounds, PixelRect::new(10, 10, 20, 20));
        let dirty = engine.apply(&mut layer).expect("apply");
        assert_eq!(dirty, Some(PixelRect::new(10, 10, 20, 20)));
        assert_eq!(layer, layer_with_block(PixelRect::new(10, 10, 20, 20)));

        let mut wide = layer_with_block(PixelRect::new(10, 10, 20, 10));
        capture(&mut engine, &mut wide, (10.0, 10.0), (30.0, 20.0));
        engine.set_rotation(90.0).expect("rotate");
        let dirty = engine.apply(&mut wide).expect("apply");
        assert_eq!(dirty, Some(PixelRect::new(15, 5, 10, 20)));
        assert_eq!(wide, layer_with_block(PixelRect::new(15, 5, 10, 20)));
        assert_eq!(engine.phase(), SelectionPhase::Inactive);
    }

    #[test]
    fn discard_restores_original_pixels() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(12, 8, 9, 7));
        layer.put_pixel(14, 9, Color::rgba(1, 2, 3, 128));
        let before = layer.clone();

        capture(&mut engine, &mut layer, (10.0, 5.0), (25.0, 20.0));
        engine.set_scale(3.0).expect("scale");
        engine.discard(&mut layer).expect("discard");

        assert_eq!(layer, before);
        assert!(!engine.is_active());
    }

    #[test]
    fn apply_without_selection_is_a_no_op() {
        let mut engine = engine();
        let mut layer = RasterBuffer::new(CANVAS);
        assert_eq!(engine.apply(&mut layer).expect("no-op apply"), None);
        assert_eq!(engine.phase(), SelectionPhase::Inactive);
    }

    #[test]
    fn end_selection_requires_selecting_phase() {
        let mut engine = engine();
        let mut layer = RasterBuffer::new(CANVAS);
        let err = engine
            .end_selection(LayerId(1), &mut layer)
            .expect_err("nothing to end");
        assert_eq!(
            err,
            SelectionError::WrongPhase {
                expected: SelectionPhase::Selecting,
                actual: SelectionPhase::Inactive,
            }
        );
    }

    #[test]
    fn hit_test_resolves_handles_in_display_space() {
        let mut engine = engine();
        engine.set_display_mapping(DisplayMapping::new(2.0, Vec2::new(100.0, 0.0)));
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));
        // Display (120, 20)..(160, 60) is raster (10, 10)..(30, 30).
        capture(&mut engine, &mut layer, (120.0, 20.0), (160.0, 60.0));
        let state = engine.state().expect("selection active");
        assert_eq!(state.bounds, Rect::new(120.0, 20.0, 160.0, 60.0));

        assert_eq!(engine.hit_test(Point::new(140.0, -12.0)), HitZone::Rotate);
        assert_eq!(
            engine.hit_test(Point::new(162.0, 62.0)),
            HitZone::Resize(Corner::BottomRight)
        );
        assert_eq!(engine.hit_test(Point::new(140.0, 40.0)), HitZone::Move);
        assert_eq!(engine.hit_test(Point::new(300.0, 40.0)), HitZone::Outside);
    }

    #[test]
    fn drags_rederive_transform_from_start() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));
        capture(&mut engine, &mut layer, (10.0, 10.0), (30.0, 30.0));

        assert_eq!(
            engine.begin_transform(Point::new(20.0, 20.0)).expect("begin move"),
            HitZone::Move
        );
        engine
            .drag_transform(Point::new(25.0, 22.0))
            .expect("drag move");
        let bounds = engine
            .drag_transform(Point::new(30.0, 20.0))
            .expect("drag move");
        assert_eq!(bounds, PixelRect::new(20, 10, 20, 20));
        engine.end_transform().expect("end move");

        // Corner handle of the moved bounds.
        assert_eq!(
            engine
                .begin_transform(Point::new(40.0, 30.0))
                .expect("begin resize"),
            HitZone::Resize(Corner::BottomRight)
        );
        let bounds = engine
            .drag_transform(Point::new(50.0, 40.0))
            .expect("drag resize");
        assert_eq!(bounds, PixelRect::new(10, 0, 40, 40));
        engine.end_transform().expect("end resize");

        let err = engine
            .drag_transform(Point::new(0.0, 0.0))
            .expect_err("no drag in progress");
        assert_eq!(err, SelectionError::NoActiveDrag);
    }

    #[test]
    fn resize_respects_min_scale() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));
        capture(&mut engine, &mut layer, (10.0, 10.0), (30.0, 30.0));
        engine.set_scale(0.0).expect("scale");
        let state = engine.state().expect("selection active");
        assert_eq!(state.transform.scale, SelectionSettings::default().min_scale);
    }

    #[test]
    fn huge_scale_is_clipped_to_the_canvas() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));
        capture(&mut engine, &mut layer, (10.0, 10.0), (30.0, 30.0));

        let bounds = engine.set_scale(1e9).expect("scale");
        assert_eq!(bounds.width, u32::MAX);
        let state = engine.state().expect("selection active");
        assert_eq!(state.placed_bounds, CANVAS.rect());
        let transformed = state.transformed.as_ref().expect("transformed pixels");
        assert_eq!(transformed.size(), CANVAS);

        let dirty = engine.apply(&mut layer).expect("apply");
        assert_eq!(dirty, Some(CANVAS.rect()));
        assert_eq!(layer.pixel(0, 0), Some(Color::rgb(200, 40, 40)));
        assert_eq!(layer.pixel(63, 63), Some(Color::rgb(200, 40, 40)));
    }

    #[test]
    fn non_finite_scale_keeps_the_current_transform() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));
        capture(&mut engine, &mut layer, (10.0, 10.0), (30.0, 30.0));
        engine.set_scale(2.0).expect("scale");

        engine.set_scale(f64::NAN).expect("nan scale");
        engine.set_scale(f64::INFINITY).expect("infinite scale");
        let state = engine.state().expect("selection active");
        assert_eq!(state.transform.scale, 2.0);
        assert_eq!(state.transformed_bounds, PixelRect::new(0, 0, 40, 40));
    }

    #[test]
    fn long_resize_drag_stays_within_the_canvas() {
        let mut engine = engine();
        let mut layer = layer_with_block(PixelRect::new(10, 10, 20, 20));
        capture(&mut engine, &mut layer, (10.0, 10.0), (30.0, 30.0));

        assert_eq!(
            engine
                .begin_transform(Point::new(30.0, 30.0))
                .expect("begin resize"),
            HitZone::Resize(Corner::BottomRight)
        );
        let bounds = engine
            .drag_transform(Point::new(1.0e7, 1.0e7))
            .expect("drag resize");
        assert!(bounds.width > CANVAS.width);
        let state = engine.state().expect("selection active");
        assert_eq!(state.placed_bounds, CANVAS.rect());
        engine.end_transform().expect("end resize");
    }
}
