//! Slide-to-activate gesture.
//! press → move* → release; activation fires at most once per cycle and only
//! when the release position clears `max_position - ACTIVATION_TOLERANCE`.
//! Move/release are fed from global pointer listeners, so a drag that leaves
//! the control keeps tracking.

/// Release within this many units of the end still activates.
pub const ACTIVATION_TOLERANCE: f64 = 5.0;

/// Label fades to zero over this much travel.
const LABEL_FADE_DISTANCE: f64 = 50.0;

/// Track/thumb layout in pointer coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderGeometry {
    /// Pointer x of the track's left edge.
    pub track_left: f64,
    pub track_width: f64,
    pub thumb_width: f64,
}

impl SliderGeometry {
    pub fn new(track_left: f64, track_width: f64, thumb_width: f64) -> Self {
        Self {
            track_left,
            track_width,
            thumb_width,
        }
    }

    /// Furthest the thumb can travel. Zero when the thumb fills the track.
    pub fn max_position(&self) -> f64 {
        (self.track_width - self.thumb_width).max(0.0)
    }

    pub fn activation_threshold(&self) -> f64 {
        self.max_position() - ACTIVATION_TOLERANCE
    }
}

pub struct DragSlider<F: FnMut()> {
    geometry: SliderGeometry,
    position: f64,
    dragging: bool,
    on_activate: F,
}

impl<F: FnMut()> DragSlider<F> {
    pub fn new(geometry: SliderGeometry, on_activate: F) -> Self {
        Self {
            geometry,
            position: 0.0,
            dragging: false,
            on_activate,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn geometry(&self) -> SliderGeometry {
        self.geometry
    }

    /// Layout changed (resize). Keeps the current position inside the new range.
    pub fn set_geometry(&mut self, geometry: SliderGeometry) {
        self.geometry = geometry;
        self.position = self.position.clamp(0.0, geometry.max_position());
    }

    /// Pointer down on the control.
    pub fn press(&mut self) {
        self.dragging = true;
    }

    /// Pointer moved to `pointer_x`. Ignored unless dragging.
    pub fn move_to(&mut self, pointer_x: f64) {
        if !self.dragging {
            return;
        }
        let raw = pointer_x - self.geometry.track_left - self.geometry.thumb_width / 2.0;
        let max = self.geometry.max_position();
        // NaN pointer coordinates pin to the start.
        self.position = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, max) };
    }

    /// Pointer up anywhere. Returns whether activation fired.
    pub fn release(&mut self) -> bool {
        if !self.dragging {
            return false;
        }
        let fired = self.position >= self.geometry.activation_threshold();
        if fired {
            (self.on_activate)();
        }
        self.dragging = false;
        self.position = 0.0;
        fired
    }

    /// Opacity of the "Slide to Activate SOS" label.
    pub fn label_opacity(&self) -> f64 {
        label_opacity(self.position)
    }

    /// Width of the filled progress bar behind the thumb.
    pub fn fill_width(&self) -> f64 {
        self.position + self.geometry.thumb_width
    }
}

/// Linear fade, zero from `LABEL_FADE_DISTANCE` onward.
pub fn label_opacity(position: f64) -> f64 {
    (1.0 - position / LABEL_FADE_DISTANCE).max(0.0)
}
