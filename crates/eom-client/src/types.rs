//! Output state types
//!
//! The enums mirror the integer codes the output service uses on the wire.
//! `from_wire`/`to_wire` are the only places those codes appear.

use std::fmt;
use std::str::FromStr;

/// Handle of an output managed by the service
///
/// Zero is reserved and never names a real output. Ids are unique for the
/// lifetime of one service instance only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

impl OutputId {
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether the id can name an output on the wire: nonzero and within int32
    pub fn is_valid(self) -> bool {
        self.to_wire().is_some()
    }

    /// Decode an id from its int32 wire form; zero and negatives are rejected
    pub fn from_wire(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().filter(|v| *v != 0).map(Self)
    }

    /// Encode as int32; `None` for the reserved id and ids beyond `i32::MAX`
    pub fn to_wire(self) -> Option<i32> {
        i32::try_from(self.0).ok().filter(|v| *v != 0)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for OutputId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Physical connector of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectorType {
    #[default]
    Unknown,
    Vga,
    DviI,
    DviD,
    DviA,
    Composite,
    SVideo,
    Lvds,
    Component,
    NinePinDin,
    DisplayPort,
    HdmiA,
    HdmiB,
    Tv,
    Edp,
    Virtual,
    Dsi,
}

impl ConnectorType {
    /// Codes outside the known range decode to `Unknown`
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            1 => Self::Vga,
            2 => Self::DviI,
            3 => Self::DviD,
            4 => Self::DviA,
            5 => Self::Composite,
            6 => Self::SVideo,
            7 => Self::Lvds,
            8 => Self::Component,
            9 => Self::NinePinDin,
            10 => Self::DisplayPort,
            11 => Self::HdmiA,
            12 => Self::HdmiB,
            13 => Self::Tv,
            14 => Self::Edp,
            15 => Self::Virtual,
            16 => Self::Dsi,
            _ => Self::Unknown,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Vga => 1,
            Self::DviI => 2,
            Self::DviD => 3,
            Self::DviA => 4,
            Self::Composite => 5,
            Self::SVideo => 6,
            Self::Lvds => 7,
            Self::Component => 8,
            Self::NinePinDin => 9,
            Self::DisplayPort => 10,
            Self::HdmiA => 11,
            Self::HdmiB => 12,
            Self::Tv => 13,
            Self::Edp => 14,
            Self::Virtual => 15,
            Self::Dsi => 16,
        }
    }

    /// Short name used in logs and CLI output
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Vga => "VGA",
            Self::DviI => "DVII",
            Self::DviD => "DVID",
            Self::DviA => "DVIA",
            Self::Composite => "COMPOSITE",
            Self::SVideo => "SVIDEO",
            Self::Lvds => "LVDS",
            Self::Component => "COMPONENT",
            Self::NinePinDin => "9PINDIN",
            Self::DisplayPort => "DISPLAYPORT",
            Self::HdmiA => "HDMIA",
            Self::HdmiB => "HDMIB",
            Self::Tv => "TV",
            Self::Edp => "EDP",
            Self::Virtual => "VIRTUAL",
            Self::Dsi => "DSI",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an output presents content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputMode {
    #[default]
    None,
    Mirror,
    Presentation,
}

impl OutputMode {
    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Mirror),
            2 => Some(Self::Presentation),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Mirror => 1,
            Self::Presentation => 2,
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Mirror => "mirror",
            Self::Presentation => "presentation",
        })
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "mirror" => Ok(Self::Mirror),
            "presentation" => Ok(Self::Presentation),
            _ => Err(format!("Unknown output mode: {}", s)),
        }
    }
}

/// Sharing policy this process holds on an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputAttribute {
    #[default]
    None,
    Normal,
    ExclusiveShare,
    Exclusive,
}

impl OutputAttribute {
    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Normal),
            2 => Some(Self::ExclusiveShare),
            3 => Some(Self::Exclusive),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Normal => 1,
            Self::ExclusiveShare => 2,
            Self::Exclusive => 3,
        }
    }
}

impl fmt::Display for OutputAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Normal => "normal",
            Self::ExclusiveShare => "exclusive-share",
            Self::Exclusive => "exclusive",
        })
    }
}

impl FromStr for OutputAttribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "normal" => Ok(Self::Normal),
            "exclusive-share" | "exclusive_share" => Ok(Self::ExclusiveShare),
            "exclusive" => Ok(Self::Exclusive),
            _ => Err(format!("Unknown output attribute: {}", s)),
        }
    }
}

/// Server-reported lifecycle of a granted attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttributeState {
    #[default]
    None,
    Active,
    Inactive,
    /// The output can no longer be used; terminal for the attribute
    Lost,
}

impl AttributeState {
    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Active),
            2 => Some(Self::Inactive),
            3 => Some(Self::Lost),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Active => 1,
            Self::Inactive => 2,
            Self::Lost => 3,
        }
    }
}

impl fmt::Display for AttributeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Lost => "lost",
        })
    }
}

/// Kind of notification a callback subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyCategory {
    Added,
    Removed,
    ModeChanged,
    AttributeChanged,
}

impl NotifyCategory {
    pub const ALL: [NotifyCategory; 4] = [
        Self::Added,
        Self::Removed,
        Self::ModeChanged,
        Self::AttributeChanged,
    ];

    /// Leading discriminant of a `Notify` push
    pub fn from_wire(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::Added),
            2 => Some(Self::Removed),
            3 => Some(Self::ModeChanged),
            4 => Some(Self::AttributeChanged),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::Added => 1,
            Self::Removed => 2,
            Self::ModeChanged => 3,
            Self::AttributeChanged => 4,
        }
    }
}

impl fmt::Display for NotifyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::ModeChanged => "mode-changed",
            Self::AttributeChanged => "attribute-changed",
        })
    }
}

/// Pixel resolution of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

/// Physical size of an output in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PhysicalSize {
    pub width_mm: i32,
    pub height_mm: i32,
}

/// Cached state of one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub id: OutputId,
    /// Fixed when the record is created
    pub connector_type: ConnectorType,
    pub mode: OutputMode,
    /// Attribute last requested and accepted for this process
    pub attribute: OutputAttribute,
    pub attribute_state: AttributeState,
    pub resolution: Resolution,
    pub physical_size: PhysicalSize,
}

impl OutputRecord {
    pub fn new(id: OutputId, connector_type: ConnectorType) -> Self {
        Self {
            id,
            connector_type,
            mode: OutputMode::None,
            attribute: OutputAttribute::None,
            attribute_state: AttributeState::None,
            resolution: Resolution::default(),
            physical_size: PhysicalSize::default(),
        }
    }
}
