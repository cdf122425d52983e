/// An axis-aligned rectangle used for spatial intersection tests.
///
/// `Envelope` is defined by its minimum (min_x, min_y) and maximum
/// (max_x, max_y) corners. A *null* envelope (min greater than max on some
/// axis) covers no space and intersects nothing; it is the starting point
/// when accumulating bounds with [`Envelope::expand_to_include`].
///
/// # Examples
///
/// ```rust,ignore
/// use nitrite_quadtree::Envelope;
///
/// let query = Envelope::new(585000.0, 4910000.0, 610000.0, 4930000.0);
/// let point = Envelope::new(597867.0, 4918863.0, 597867.0, 4918863.0);
/// assert!(query.intersects(&point));
/// ```
#[derive(Clone, Copy, PartialEq, Debug, serde::Deserialize, serde::Serialize)]
pub struct Envelope {
    /// Minimum X coordinate
    pub min_x: f64,
    /// Minimum Y coordinate
    pub min_y: f64,
    /// Maximum X coordinate
    pub max_x: f64,
    /// Maximum Y coordinate
    pub max_y: f64,
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "Envelope(null)");
        }
        write!(
            f,
            "Envelope({}, {}, {}, {})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::null()
    }
}

impl Envelope {
    /// Creates a new envelope from its corners.
    ///
    /// # Arguments
    ///
    /// * `min_x` - Minimum X coordinate
    /// * `min_y` - Minimum Y coordinate
    /// * `max_x` - Maximum X coordinate
    /// * `max_y` - Maximum Y coordinate
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Envelope {
        Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Creates an envelope from two x values and two y values in any order.
    pub fn from_coords(x1: f64, x2: f64, y1: f64, y2: f64) -> Envelope {
        Envelope::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
    }

    /// Returns the null envelope.
    pub fn null() -> Envelope {
        Envelope {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Checks if this envelope covers no space at all.
    pub fn is_null(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Returns the width of the envelope.
    pub fn width(&self) -> f64 {
        if self.is_null() {
            0.0
        } else {
            self.max_x - self.min_x
        }
    }

    /// Returns the height of the envelope.
    pub fn height(&self) -> f64 {
        if self.is_null() {
            0.0
        } else {
            self.max_y - self.min_y
        }
    }

    /// Returns the area of the envelope.
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Returns the center point of the envelope.
    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    /// Checks if this envelope contains a point.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Checks if this envelope fully covers another one.
    pub fn contains(&self, other: &Envelope) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Checks if the two envelopes share at least one point. Touching edges
    /// count as an intersection.
    pub fn intersects(&self, other: &Envelope) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Grows this envelope so that it covers `other` as well.
    pub fn expand_to_include(&mut self, other: &Envelope) {
        if other.is_null() {
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Returns the union of this envelope with another.
    pub fn union(&self, other: &Envelope) -> Envelope {
        let mut result = *self;
        result.expand_to_include(other);
        result
    }
}
