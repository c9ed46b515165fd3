//! MLLR adaptation transforms.
//!
//! A transform is a per-stream affine map `A*x + B` applied to Gaussian
//! means, estimated offline and exchanged through a line-oriented text
//! format shared with other decoders:
//!
//! ```text
//! <nMllrClass>
//! <numStreams>
//! for each stream:
//!   <vectorLength>
//!   vectorLength rows of vectorLength floats   (A, row-major)
//!   one row of vectorLength floats             (B)
//!   one row of vectorLength floats             (variance scale, ignored)
//! ```
//!
//! Loading and applying transforms is a batch path between recognitions,
//! never part of the frame loop.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::api::DecodeError;

/// Affine transform of one feature stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTransform {
    /// Row-major square matrix, `vector_length` × `vector_length`.
    pub a: Vec<Vec<f32>>,
    pub b: Vec<f32>,
}

impl StreamTransform {
    pub fn vector_length(&self) -> usize {
        self.b.len()
    }

    /// Applies `A*mean + B` in place.
    pub fn apply_to_mean(&self, mean: &mut [f32]) {
        assert_eq!(
            mean.len(),
            self.vector_length(),
            "mean length does not match transform vector length"
        );
        let original = mean.to_vec();
        for (i, row) in self.a.iter().enumerate() {
            let mut sum = self.b[i];
            for (j, &coeff) in row.iter().enumerate() {
                sum += coeff * original[j];
            }
            mean[i] = sum;
        }
    }
}

/// A loaded MLLR transform: one [`StreamTransform`] per feature stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub num_classes: usize,
    pub streams: Vec<StreamTransform>,
}

impl Transform {
    /// Reads a transform from its text representation.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let mut tokens = text.split_whitespace();

        let num_classes = next_count(&mut tokens, "nMllrClass")?;
        if num_classes != 1 {
            return Err(DecodeError::TransformLoad {
                msg: format!("unsupported number of MLLR classes: {num_classes}"),
            });
        }
        let num_streams = next_count(&mut tokens, "numStreams")?;

        let mut streams = Vec::with_capacity(num_streams);
        for stream in 0..num_streams {
            let len = next_count(&mut tokens, "vectorLength")?;
            let mut a = Vec::with_capacity(len);
            for row in 0..len {
                let mut r = Vec::with_capacity(len);
                for col in 0..len {
                    r.push(next_value(
                        &mut tokens,
                        &format!("A[{stream}][{row}][{col}]"),
                    )?);
                }
                a.push(r);
            }
            let mut b = Vec::with_capacity(len);
            for i in 0..len {
                b.push(next_value(&mut tokens, &format!("B[{stream}][{i}]"))?);
            }
            // variance scale row: present in the format, ignored on load
            for i in 0..len {
                next_value(&mut tokens, &format!("variance[{stream}][{i}]"))?;
            }
            streams.push(StreamTransform { a, b });
        }

        Ok(Transform {
            num_classes,
            streams,
        })
    }

    /// Loads a transform from a file.
    pub fn load(path: &Path) -> Result<Self, DecodeError> {
        let text = fs::read_to_string(path).map_err(|e| DecodeError::TransformLoad {
            msg: format!("{}: {e}", path.display()),
        })?;
        Self::parse(&text)
    }

    /// Serializes in the shared text format; variance scales are written
    /// as 1.0.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.num_classes);
        let _ = writeln!(out, "{}", self.streams.len());
        for stream in &self.streams {
            let len = stream.vector_length();
            let _ = writeln!(out, "{len}");
            for row in &stream.a {
                for v in row {
                    let _ = write!(out, "{v} ");
                }
                out.push('\n');
            }
            for v in &stream.b {
                let _ = write!(out, "{v} ");
            }
            out.push('\n');
            for _ in 0..len {
                out.push_str("1.0 ");
            }
            out.push('\n');
        }
        out
    }

    /// Writes the transform to a file in the shared text format.
    pub fn store(&self, path: &Path) -> Result<(), DecodeError> {
        fs::write(path, self.to_text()).map_err(|e| DecodeError::Io {
            msg: format!("{}: {e}", path.display()),
        })
    }
}

fn next_value<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<f32, DecodeError> {
    let tok = tokens.next().ok_or_else(|| DecodeError::TransformLoad {
        msg: format!("unexpected end of file reading {what}"),
    })?;
    tok.parse::<f32>().map_err(|_| DecodeError::TransformLoad {
        msg: format!("malformed {what}: {tok:?}"),
    })
}

fn next_count<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<usize, DecodeError> {
    let v = next_value(tokens, what)?;
    if v < 1.0 || v.fract() != 0.0 {
        return Err(DecodeError::TransformLoad {
            msg: format!("invalid {what}: {v}"),
        });
    }
    Ok(v as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n1\n2\n\
        1.0 0.0\n\
        0.0 2.0\n\
        0.5 -0.5\n\
        1.0 1.0\n";

    #[test]
    fn test_parse_sample() {
        let t = Transform::parse(SAMPLE).unwrap();
        assert_eq!(t.num_classes, 1);
        assert_eq!(t.streams.len(), 1);
        let s = &t.streams[0];
        assert_eq!(s.vector_length(), 2);
        assert_eq!(s.a, vec![vec![1.0, 0.0], vec![0.0, 2.0]]);
        assert_eq!(s.b, vec![0.5, -0.5]);
    }

    #[test]
    fn test_apply_to_mean() {
        let t = Transform::parse(SAMPLE).unwrap();
        let mut mean = vec![3.0, 4.0];
        t.streams[0].apply_to_mean(&mut mean);
        // A*x + B = [1*3 + 0*4 + 0.5, 0*3 + 2*4 - 0.5]
        assert_eq!(mean, vec![3.5, 7.5]);
    }

    #[test]
    fn test_store_load_round_trip() {
        let t = Transform::parse(SAMPLE).unwrap();
        let text = t.to_text();
        let back = Transform::parse(&text).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let err = Transform::parse("1\n1\n3\n1.0 2.0\n").unwrap_err();
        assert!(matches!(err, DecodeError::TransformLoad { .. }));
    }

    #[test]
    fn test_multiple_classes_rejected() {
        let err = Transform::parse("2\n1\n1\n1.0\n0.0\n1.0\n").unwrap_err();
        assert!(matches!(err, DecodeError::TransformLoad { .. }));
    }

    #[test]
    fn test_garbage_token_is_an_error() {
        let err = Transform::parse("1\n1\n1\nxyz\n0.0\n1.0\n").unwrap_err();
        assert!(matches!(err, DecodeError::TransformLoad { .. }));
    }
}
