/// One HSV color as the firmware expects it (each channel 0-255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorSample {
    pub hue: u8,
    pub saturation: u8,
    pub value: u8,
}

impl ColorSample {
    pub const fn new(hue: u8, saturation: u8, value: u8) -> Self {
        ColorSample { hue, saturation, value }
    }

    /// Fully saturated, full brightness color from a hue in degrees (0-360)
    pub fn from_hue_degrees(degrees: u16) -> Self {
        let hue = (u32::from(degrees.min(360)) * 255 / 360) as u8;
        ColorSample::new(hue, 255, 255)
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.hue, self.saturation, self.value]
    }
}

/// Color payload of a free-form command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorData {
    /// One color applied to every LED
    Uniform(ColorSample),
    /// One color per LED; length must match the strip
    Unique(Vec<ColorSample>),
}

impl ColorData {
    /// Number of triplets this payload puts on the wire
    pub fn len(&self) -> usize {
        match self {
            ColorData::Uniform(_) => 1,
            ColorData::Unique(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten to HSV triplets
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ColorData::Uniform(sample) => sample.to_bytes().to_vec(),
            ColorData::Unique(samples) => {
                let mut result = Vec::with_capacity(samples.len() * 3);
                for sample in samples {
                    result.extend_from_slice(&sample.to_bytes());
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hue_degrees() {
        assert_eq!(ColorSample::from_hue_degrees(0), ColorSample::new(0, 255, 255));
        assert_eq!(ColorSample::from_hue_degrees(42).hue, 29);
        assert_eq!(ColorSample::from_hue_degrees(229).hue, 162);
        assert_eq!(ColorSample::from_hue_degrees(360).hue, 255);
    }

    #[test]
    fn test_unique_flatten() {
        let data = ColorData::Unique(vec![
            ColorSample::new(1, 2, 3),
            ColorSample::new(4, 5, 6),
        ]);
        assert_eq!(data.len(), 2);
        assert_eq!(data.to_bytes(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_uniform_flatten() {
        let data = ColorData::Uniform(ColorSample::new(10, 20, 30));
        assert_eq!(data.len(), 1);
        assert_eq!(data.to_bytes(), vec![10, 20, 30]);
    }
}
