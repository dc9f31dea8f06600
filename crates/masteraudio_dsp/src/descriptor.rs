//! Stream Descriptors
//!
//! A [`StreamDescriptor`] is the negotiated format at one point in the
//! pipeline. It is a thin typed view over an [`AttributeCollection`]; the
//! bag stays the source of truth so negotiation code can copy, diff and
//! partially update descriptors attribute by attribute.
//!
//! A descriptor is only usable once it is *complete*: every attribute
//! required by its declared [`StreamFormat`] must be present. Consumers call
//! [`StreamDescriptor::validate`] and reject incomplete descriptors instead
//! of guessing defaults.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeCollection, AttributeId};
use crate::error::{DspError, DspResult};

/// Payload must not be altered by any DSP stage
pub const FLAG_LOCKED: u32 = 1 << 0;
/// Variable bit rate payload
pub const FLAG_VBR: u32 = 1 << 1;

/// Top-level payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamFormat {
    /// Linear PCM
    Lpcm,
    /// Encoded frames carried in IEC61937 bursts
    Iec61937,
}

impl StreamFormat {
    fn to_raw(self) -> i32 {
        match self {
            StreamFormat::Lpcm => 1,
            StreamFormat::Iec61937 => 2,
        }
    }

    fn from_raw(raw: i32) -> DspResult<Self> {
        match raw {
            1 => Ok(StreamFormat::Lpcm),
            2 => Ok(StreamFormat::Iec61937),
            other => Err(DspError::NotSupported(format!("stream format {other}"))),
        }
    }
}

/// Compressed payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Ac3,
    Dts,
}

impl Encoding {
    fn to_raw(self) -> i32 {
        match self {
            Encoding::Ac3 => 1,
            Encoding::Dts => 2,
        }
    }

    fn from_raw(raw: i32) -> DspResult<Self> {
        match raw {
            1 => Ok(Encoding::Ac3),
            2 => Ok(Encoding::Dts),
            other => Err(DspError::NotSupported(format!("encoding {other}"))),
        }
    }
}

/// Storage type of one PCM sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    Int16,
    /// Packed little-endian 3-byte samples
    Int24,
    Int32,
    Float32,
}

impl SampleType {
    pub fn bytes(self) -> usize {
        match self {
            SampleType::Int16 => 2,
            SampleType::Int24 => 3,
            SampleType::Int32 | SampleType::Float32 => 4,
        }
    }

    pub fn bit_depth(self) -> u32 {
        self.bytes() as u32 * 8
    }

    fn to_raw(self) -> i32 {
        match self {
            SampleType::Int16 => 1,
            SampleType::Int24 => 2,
            SampleType::Int32 => 3,
            SampleType::Float32 => 4,
        }
    }

    fn from_raw(raw: i32) -> DspResult<Self> {
        match raw {
            1 => Ok(SampleType::Int16),
            2 => Ok(SampleType::Int24),
            3 => Ok(SampleType::Int32),
            4 => Ok(SampleType::Float32),
            other => Err(DspError::NotSupported(format!("sample type {other}"))),
        }
    }
}

/// Speaker position of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelRole {
    FrontLeft,
    FrontRight,
    FrontCenter,
    LowFrequency,
    BackLeft,
    BackRight,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    BackCenter,
    SideLeft,
    SideRight,
}

impl ChannelRole {
    const ALL: [ChannelRole; 11] = [
        ChannelRole::FrontLeft,
        ChannelRole::FrontRight,
        ChannelRole::FrontCenter,
        ChannelRole::LowFrequency,
        ChannelRole::BackLeft,
        ChannelRole::BackRight,
        ChannelRole::SideLeft,
        ChannelRole::SideRight,
        ChannelRole::FrontLeftOfCenter,
        ChannelRole::FrontRightOfCenter,
        ChannelRole::BackCenter,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            ChannelRole::FrontLeft => "FL",
            ChannelRole::FrontRight => "FR",
            ChannelRole::FrontCenter => "FC",
            ChannelRole::LowFrequency => "LFE",
            ChannelRole::BackLeft => "BL",
            ChannelRole::BackRight => "BR",
            ChannelRole::FrontLeftOfCenter => "FLC",
            ChannelRole::FrontRightOfCenter => "FRC",
            ChannelRole::BackCenter => "BC",
            ChannelRole::SideLeft => "SL",
            ChannelRole::SideRight => "SR",
        }
    }

    fn to_raw(self) -> u32 {
        match self {
            ChannelRole::FrontLeft => 0,
            ChannelRole::FrontRight => 1,
            ChannelRole::FrontCenter => 2,
            ChannelRole::LowFrequency => 3,
            ChannelRole::BackLeft => 4,
            ChannelRole::BackRight => 5,
            ChannelRole::FrontLeftOfCenter => 6,
            ChannelRole::FrontRightOfCenter => 7,
            ChannelRole::BackCenter => 8,
            ChannelRole::SideLeft => 9,
            ChannelRole::SideRight => 10,
        }
    }

    fn from_raw(raw: u32) -> DspResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|role| role.to_raw() == raw)
            .ok_or_else(|| DspError::NotSupported(format!("channel role {raw}")))
    }
}

/// Ordered list of channel roles; position `i` describes sample `i` of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout(Vec<ChannelRole>);

impl ChannelLayout {
    pub fn new(roles: Vec<ChannelRole>) -> Self {
        Self(roles)
    }

    pub fn mono() -> Self {
        Self(vec![ChannelRole::FrontCenter])
    }

    pub fn stereo() -> Self {
        Self(vec![ChannelRole::FrontLeft, ChannelRole::FrontRight])
    }

    pub fn layout_2_1() -> Self {
        Self(vec![
            ChannelRole::FrontLeft,
            ChannelRole::FrontRight,
            ChannelRole::LowFrequency,
        ])
    }

    /// FL FR FC LFE BL BR, the order AC3 encoders expect
    pub fn surround_5_1() -> Self {
        Self(vec![
            ChannelRole::FrontLeft,
            ChannelRole::FrontRight,
            ChannelRole::FrontCenter,
            ChannelRole::LowFrequency,
            ChannelRole::BackLeft,
            ChannelRole::BackRight,
        ])
    }

    pub fn surround_7_1() -> Self {
        Self(vec![
            ChannelRole::FrontLeft,
            ChannelRole::FrontRight,
            ChannelRole::FrontCenter,
            ChannelRole::LowFrequency,
            ChannelRole::BackLeft,
            ChannelRole::BackRight,
            ChannelRole::SideLeft,
            ChannelRole::SideRight,
        ])
    }

    /// Conventional layout for a channel count
    ///
    /// Counts without a named layout take the first `count` roles in
    /// surround order; counts above the number of roles yield a short layout
    /// that fails validation.
    pub fn default_for(count: u32) -> Self {
        match count {
            1 => Self::mono(),
            2 => Self::stereo(),
            3 => Self::layout_2_1(),
            6 => Self::surround_5_1(),
            8 => Self::surround_7_1(),
            n => Self(ChannelRole::ALL.iter().copied().take(n as usize).collect()),
        }
    }

    pub fn roles(&self) -> &[ChannelRole] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, role: ChannelRole) -> Option<usize> {
        self.0.iter().position(|r| *r == role)
    }

    pub fn contains(&self, role: ChannelRole) -> bool {
        self.0.contains(&role)
    }

    fn to_raw(&self) -> Vec<u32> {
        self.0.iter().map(|r| r.to_raw()).collect()
    }

    fn from_raw(raw: &[u32]) -> DspResult<Self> {
        raw.iter()
            .map(|r| ChannelRole::from_raw(*r))
            .collect::<DspResult<Vec<_>>>()
            .map(Self)
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|r| r.short_name()).collect();
        write!(f, "{}", names.join(" "))
    }
}

const LPCM_REQUIRED: [AttributeId; 7] = [
    AttributeId::StreamFormat,
    AttributeId::ChannelCount,
    AttributeId::ChannelLayout,
    AttributeId::BitDepth,
    AttributeId::SampleRate,
    AttributeId::SampleType,
    AttributeId::Interleaved,
];

const IEC61937_REQUIRED: [AttributeId; 7] = [
    AttributeId::StreamFormat,
    AttributeId::Encoding,
    AttributeId::ChannelCount,
    AttributeId::BitDepth,
    AttributeId::SampleRate,
    AttributeId::BitRate,
    AttributeId::FrameSize,
];

/// One negotiated audio format
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDescriptor {
    attrs: AttributeCollection,
}

impl StreamDescriptor {
    /// Empty (incomplete) descriptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete interleaved LPCM descriptor with the default layout for `channels`
    pub fn lpcm(channels: u32, sample_rate: u32, sample_type: SampleType) -> Self {
        let mut desc = Self::new();
        // A fresh bag cannot hold conflicting types, so these writes cannot fail
        let _ = desc.set_stream_format(StreamFormat::Lpcm);
        let _ = desc.set_layout(&ChannelLayout::default_for(channels));
        let _ = desc.set_channel_count(channels);
        let _ = desc.set_sample_rate(sample_rate);
        let _ = desc.set_sample_type(sample_type);
        let _ = desc.set_interleaved(true);
        let _ = desc.update_derived();
        desc
    }

    /// Complete IEC61937 descriptor carrying AC3 bursts on a stereo 16-bit link
    pub fn iec61937_ac3(sample_rate: u32, bit_rate: u32) -> Self {
        let mut desc = Self::new();
        let _ = desc.set_stream_format(StreamFormat::Iec61937);
        let _ = desc.set_encoding(Encoding::Ac3);
        let _ = desc.set_layout(&ChannelLayout::stereo());
        let _ = desc.set_channel_count(2);
        let _ = desc.set_sample_rate(sample_rate);
        let _ = desc.set_sample_type(SampleType::Int16);
        let _ = desc.set_interleaved(true);
        let _ = desc.set_bit_rate(bit_rate);
        let _ = desc.set_frame_size(crate::filters::iec61937::BURST_BYTES as u32);
        let _ = desc.update_derived();
        desc
    }

    pub fn attributes(&self) -> &AttributeCollection {
        &self.attrs
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeCollection {
        &mut self.attrs
    }

    fn get_u32(&self, id: AttributeId) -> DspResult<u32> {
        let raw = required(id, self.attrs.get_int(id))?;
        u32::try_from(raw).map_err(|_| DspError::NotSupported(format!("{id:?} = {raw}")))
    }

    fn set_u32(&mut self, id: AttributeId, value: u32) -> DspResult<()> {
        let raw = i32::try_from(value)
            .map_err(|_| DspError::NotSupported(format!("{id:?} = {value}")))?;
        self.attrs.set_int(id, raw)
    }

    // --- typed accessors ---

    pub fn stream_format(&self) -> DspResult<StreamFormat> {
        StreamFormat::from_raw(required(
            AttributeId::StreamFormat,
            self.attrs.get_int(AttributeId::StreamFormat),
        )?)
    }

    pub fn set_stream_format(&mut self, format: StreamFormat) -> DspResult<()> {
        self.attrs.set_int(AttributeId::StreamFormat, format.to_raw())
    }

    pub fn channel_count(&self) -> DspResult<u32> {
        self.get_u32(AttributeId::ChannelCount)
    }

    pub fn set_channel_count(&mut self, channels: u32) -> DspResult<()> {
        self.set_u32(AttributeId::ChannelCount, channels)
    }

    pub fn layout(&self) -> DspResult<ChannelLayout> {
        ChannelLayout::from_raw(required(
            AttributeId::ChannelLayout,
            self.attrs.get_array(AttributeId::ChannelLayout),
        )?)
    }

    pub fn set_layout(&mut self, layout: &ChannelLayout) -> DspResult<()> {
        self.attrs.set_array(AttributeId::ChannelLayout, &layout.to_raw())
    }

    pub fn bit_depth(&self) -> DspResult<u32> {
        self.get_u32(AttributeId::BitDepth)
    }

    pub fn sample_rate(&self) -> DspResult<u32> {
        self.get_u32(AttributeId::SampleRate)
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> DspResult<()> {
        self.set_u32(AttributeId::SampleRate, rate)
    }

    pub fn sample_type(&self) -> DspResult<SampleType> {
        SampleType::from_raw(required(
            AttributeId::SampleType,
            self.attrs.get_int(AttributeId::SampleType),
        )?)
    }

    /// Sets the sample type and the matching bit depth
    pub fn set_sample_type(&mut self, sample_type: SampleType) -> DspResult<()> {
        self.attrs
            .set_int(AttributeId::SampleType, sample_type.to_raw())?;
        self.set_u32(AttributeId::BitDepth, sample_type.bit_depth())
    }

    pub fn interleaved(&self) -> DspResult<bool> {
        required(
            AttributeId::Interleaved,
            self.attrs.get_bool(AttributeId::Interleaved),
        )
    }

    pub fn set_interleaved(&mut self, interleaved: bool) -> DspResult<()> {
        self.attrs.set_bool(AttributeId::Interleaved, interleaved)
    }

    pub fn encoding(&self) -> DspResult<Encoding> {
        Encoding::from_raw(required(
            AttributeId::Encoding,
            self.attrs.get_int(AttributeId::Encoding),
        )?)
    }

    pub fn set_encoding(&mut self, encoding: Encoding) -> DspResult<()> {
        self.attrs.set_int(AttributeId::Encoding, encoding.to_raw())
    }

    pub fn bit_rate(&self) -> DspResult<u32> {
        self.get_u32(AttributeId::BitRate)
    }

    pub fn set_bit_rate(&mut self, bit_rate: u32) -> DspResult<()> {
        self.set_u32(AttributeId::BitRate, bit_rate)
    }

    /// Bytes per coded burst (IEC61937 only)
    pub fn frame_size(&self) -> DspResult<u32> {
        self.get_u32(AttributeId::FrameSize)
    }

    pub fn set_frame_size(&mut self, bytes: u32) -> DspResult<()> {
        self.set_u32(AttributeId::FrameSize, bytes)
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.attrs.get_flag(AttributeId::Flags, flag).unwrap_or(false)
    }

    pub fn set_flag(&mut self, flag: u32, on: bool) -> DspResult<()> {
        self.attrs.set_flag(AttributeId::Flags, flag, on)
    }

    pub fn is_locked(&self) -> bool {
        self.has_flag(FLAG_LOCKED)
    }

    pub fn is_lpcm(&self) -> bool {
        matches!(self.stream_format(), Ok(StreamFormat::Lpcm))
    }

    // --- completeness ---

    /// Check that every attribute required by the stream format is present
    /// and that the values agree with each other
    pub fn validate(&self) -> DspResult<()> {
        let format = self.stream_format()?;
        let required: &[AttributeId] = match format {
            StreamFormat::Lpcm => &LPCM_REQUIRED,
            StreamFormat::Iec61937 => &IEC61937_REQUIRED,
        };
        if let Some(missing) = required.iter().find(|id| !self.attrs.contains(**id)) {
            return Err(DspError::MissingAttribute(*missing));
        }

        let channels = self.channel_count()?;
        if channels == 0 {
            return Err(DspError::NotSupported("zero channels".into()));
        }
        if self.sample_rate()? == 0 {
            return Err(DspError::NotSupported("zero sample rate".into()));
        }

        match format {
            StreamFormat::Lpcm => {
                let layout = self.layout()?;
                if layout.len() != channels as usize {
                    return Err(DspError::NotSupported(format!(
                        "layout has {} roles for {} channels",
                        layout.len(),
                        channels
                    )));
                }
                let sample_type = self.sample_type()?;
                let depth = self.bit_depth()?;
                if depth != sample_type.bit_depth() {
                    return Err(DspError::NotSupported(format!(
                        "bit depth {depth} does not match {sample_type:?}"
                    )));
                }
            }
            StreamFormat::Iec61937 => {
                self.encoding()?;
                if self.bit_depth()? != 16 {
                    return Err(DspError::NotSupported("IEC61937 requires 16-bit words".into()));
                }
                if self.frame_size()? == 0 {
                    return Err(DspError::NotSupported("zero burst size".into()));
                }
            }
        }
        Ok(())
    }

    /// Size of one frame across all channels
    pub fn bytes_per_frame(&self) -> DspResult<usize> {
        if let Ok(stored) = self.get_u32(AttributeId::BytesPerFrame) {
            return Ok(stored as usize);
        }
        self.compute_bytes_per_frame()
    }

    pub fn bytes_per_second(&self) -> DspResult<usize> {
        if let Ok(stored) = self.get_u32(AttributeId::BytesPerSec) {
            return Ok(stored as usize);
        }
        Ok(self.compute_bytes_per_frame()? * self.sample_rate()? as usize)
    }

    fn compute_bytes_per_frame(&self) -> DspResult<usize> {
        let channels = self.channel_count()? as usize;
        let bytes_per_sample = (self.bit_depth()? as usize).div_ceil(8);
        Ok(channels * bytes_per_sample)
    }

    /// Recompute `BytesPerFrame` and `BytesPerSec` from the base attributes
    pub fn update_derived(&mut self) -> DspResult<()> {
        let frame = self.compute_bytes_per_frame()?;
        let rate = self.sample_rate()? as usize;
        self.set_u32(AttributeId::BytesPerFrame, frame as u32)?;
        self.set_u32(AttributeId::BytesPerSec, (frame * rate) as u32)
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        match self.stream_format() {
            Ok(StreamFormat::Lpcm) => format!(
                "LPCM {}ch {}Hz {} {} [{}]",
                self.channel_count().unwrap_or(0),
                self.sample_rate().unwrap_or(0),
                self.sample_type()
                    .map(|t| format!("{t:?}"))
                    .unwrap_or_else(|_| "?".into()),
                if self.interleaved().unwrap_or(true) { "interleaved" } else { "planar" },
                self.layout().map(|l| l.to_string()).unwrap_or_default(),
            ),
            Ok(StreamFormat::Iec61937) => format!(
                "IEC61937 {} {}Hz {}bps burst {}B",
                self.encoding()
                    .map(|e| format!("{e:?}"))
                    .unwrap_or_else(|_| "?".into()),
                self.sample_rate().unwrap_or(0),
                self.bit_rate().unwrap_or(0),
                self.frame_size().unwrap_or(0),
            ),
            Err(_) => "incomplete descriptor".into(),
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// An absent attribute makes the descriptor incomplete
fn required<T>(id: AttributeId, value: DspResult<T>) -> DspResult<T> {
    value.map_err(|e| match e {
        DspError::NotFound(_) => DspError::MissingAttribute(id),
        other => other,
    })
}
