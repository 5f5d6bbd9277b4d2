//! Network protocol definitions shared between client and server.
//!
//! Every logical event is one envelope: a JSON array whose first element is
//! the numeric [`Packet`] opcode, followed by positional arguments. A frame on
//! the wire carries either a single envelope (`[9,0,5,10,10,false,false]`) or
//! a batch of envelopes (`[[15,3],[12,7]]`). The server may also send a bare
//! UTF-8 [`Notice`] string right before closing a connection.

use std::collections::HashSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    ChatInfo, ContainerSlot, EntityState, EquipmentData, EquipmentSlot, ExperienceInfo, HealInfo,
    Hit, InstanceId, QuestInfo, SyncInfo, WelcomeInfo,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default server tick rate in Hz
pub const DEFAULT_TICK_RATE: u32 = 20;

/// Default server port
pub const DEFAULT_PORT: u16 = 9001;

/// Pixels per tile; continuous positions are grid positions times this
pub const TILE_SIZE: u32 = 16;

/// Declares a `#[repr(u8)]` wire enum with `from_u8`/`as_u8`.
macro_rules! opcodes {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_u8(&self) -> u8 {
                *self as u8
            }
        }
    };
}

// =============================================================================
// Opcodes
// =============================================================================

opcodes! {
    /// Top-level packet opcode, the first element of every envelope
    Packet {
        Handshake = 0,
        Intro = 1,
        Welcome = 2,
        Spawn = 3,
        List = 4,
        Who = 5,
        Equipment = 6,
        Ready = 7,
        Sync = 8,
        Movement = 9,
        Teleport = 10,
        Request = 11,
        Despawn = 12,
        Target = 13,
        Combat = 14,
        Population = 15,
        Points = 16,
        Network = 17,
        Chat = 18,
        Inventory = 19,
        Bank = 20,
        Respawn = 21,
        Notification = 22,
        Experience = 23,
        Death = 24,
        Quest = 25,
        Npc = 26,
        Pointer = 27,
        Pvp = 28,
        Heal = 29,
    }
}

opcodes! {
    IntroOpcode { Login = 0, Register = 1, Guest = 2 }
}

opcodes! {
    EquipmentOpcode { Batch = 0, Equip = 1, Unequip = 2 }
}

opcodes! {
    MovementOpcode { Move = 0, Follow = 1, Freeze = 2, Stunned = 3, Stop = 4, Started = 5 }
}

opcodes! {
    TargetOpcode { Attack = 0, None = 1 }
}

opcodes! {
    CombatOpcode { Initiate = 0, Hit = 1, Finish = 2 }
}

opcodes! {
    NetworkOpcode { Ping = 0, Pong = 1 }
}

opcodes! {
    /// Shared by the Inventory and Bank packets
    ContainerOpcode { Batch = 0, Add = 1, Remove = 2, Select = 3 }
}

opcodes! {
    ContainerType { Inventory = 0, Bank = 1 }
}

opcodes! {
    NotificationOpcode { Ok = 0, YesNo = 1, Text = 2 }
}

opcodes! {
    QuestOpcode { Batch = 0, Progress = 1, Finish = 2 }
}

opcodes! {
    NpcOpcode { Talk = 0, Bank = 1, Enchant = 2, Countdown = 3 }
}

opcodes! {
    PointerOpcode { Npc = 0, Location = 1, Relative = 2, Remove = 3 }
}

// =============================================================================
// Errors
// =============================================================================

/// Why an incoming frame or envelope was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Not valid JSON, or not an array
    Malformed(String),
    EmptyFrame,
    UnknownOpcode(u64),
    UnknownSubtype { packet: Packet, value: u64 },
    MissingArgument { packet: Packet, index: usize },
    InvalidArgument { packet: Packet, index: usize },
    /// A valid opcode that this side never receives
    UnexpectedPacket(Packet),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(reason) => write!(f, "Malformed frame: {}", reason),
            ProtocolError::EmptyFrame => write!(f, "Empty frame"),
            ProtocolError::UnknownOpcode(op) => write!(f, "Unknown opcode {}", op),
            ProtocolError::UnknownSubtype { packet, value } => {
                write!(f, "Unknown subtype {} for {:?}", value, packet)
            }
            ProtocolError::MissingArgument { packet, index } => {
                write!(f, "{:?} is missing argument {}", packet, index)
            }
            ProtocolError::InvalidArgument { packet, index } => {
                write!(f, "{:?} has an invalid argument at {}", packet, index)
            }
            ProtocolError::UnexpectedPacket(packet) => write!(f, "Unexpected packet {:?}", packet),
        }
    }
}

impl std::error::Error for ProtocolError {}

// =============================================================================
// Argument reader
// =============================================================================

/// Positional reader over the arguments of one envelope
struct Args<'a> {
    packet: Packet,
    items: &'a [Value],
    index: usize,
}

impl<'a> Args<'a> {
    fn new(packet: Packet, items: &'a [Value]) -> Self {
        Self { packet, items, index: 0 }
    }

    fn next(&mut self) -> Result<&'a Value, ProtocolError> {
        let value = self.items.get(self.index).ok_or(ProtocolError::MissingArgument {
            packet: self.packet,
            index: self.index,
        })?;
        self.index += 1;
        Ok(value)
    }

    fn invalid(&self) -> ProtocolError {
        ProtocolError::InvalidArgument {
            packet: self.packet,
            index: self.index.saturating_sub(1),
        }
    }

    fn has_more(&self) -> bool {
        self.index < self.items.len()
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        let value = self.next()?;
        value.as_u64().ok_or_else(|| self.invalid())
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let value = self.u64()?;
        u32::try_from(value).map_err(|_| self.invalid())
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let value = self.u64()?;
        u16::try_from(value).map_err(|_| self.invalid())
    }

    /// Accepts `true`/`false` as well as `1`/`0`
    fn bool(&mut self) -> Result<bool, ProtocolError> {
        let value = self.next()?;
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_u64().unwrap_or(0) != 0),
            _ => Err(self.invalid()),
        }
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        let value = self.next()?;
        value.as_str().map(str::to_string).ok_or_else(|| self.invalid())
    }

    fn opt_string(&mut self) -> Result<Option<String>, ProtocolError> {
        if !self.has_more() || self.items[self.index].is_null() {
            self.index += 1;
            return Ok(None);
        }
        self.string().map(Some)
    }

    fn subtype<T>(&mut self, from_u8: fn(u8) -> Option<T>) -> Result<T, ProtocolError> {
        let raw = self.u64()?;
        u8::try_from(raw)
            .ok()
            .and_then(from_u8)
            .ok_or(ProtocolError::UnknownSubtype { packet: self.packet, value: raw })
    }

    fn object<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let value = self.next()?;
        serde_json::from_value(value.clone()).map_err(|_| self.invalid())
    }

    fn opt_object<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        if !self.has_more() || self.items[self.index].is_null() {
            self.index += 1;
            return Ok(None);
        }
        self.object().map(Some)
    }
}

/// Splits an envelope into its opcode and argument list
fn open_envelope(value: &Value) -> Result<(Packet, &[Value]), ProtocolError> {
    let items = value
        .as_array()
        .ok_or_else(|| ProtocolError::Malformed("envelope is not an array".into()))?;
    let (head, rest) = items.split_first().ok_or(ProtocolError::EmptyFrame)?;
    let raw = head
        .as_u64()
        .ok_or_else(|| ProtocolError::Malformed("opcode is not a number".into()))?;
    let packet = u8::try_from(raw)
        .ok()
        .and_then(Packet::from_u8)
        .ok_or(ProtocolError::UnknownOpcode(raw))?;
    Ok((packet, rest))
}

// =============================================================================
// Server -> Client Messages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerBatch {
    pub size: u32,
    pub slots: Vec<ContainerSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRemoval {
    pub index: u32,
    pub count: u32,
}

/// Inventory or bank change, depending on which packet carries it
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerUpdate {
    Batch(ContainerBatch),
    Add(ContainerSlot),
    Remove(ContainerRemoval),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EquipmentUpdate {
    Batch(Vec<EquipmentData>),
    Equip(EquipmentData),
    Unequip(EquipmentSlot),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MovementUpdate {
    Move { id: InstanceId, x: u16, y: u16, forced: bool, with_animation: bool },
    Follow { id: InstanceId, target: InstanceId },
    Freeze { id: InstanceId, state: bool },
    Stunned { id: InstanceId, state: bool },
    Stop { forced: bool },
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestProgress {
    pub id: u32,
    pub stage: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuestUpdate {
    Batch(Vec<QuestInfo>),
    Progress(QuestProgress),
    Finish { id: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcTalk {
    pub id: InstanceId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NpcUpdate {
    Talk(NpcTalk),
    Bank,
    Enchant,
    Countdown { id: InstanceId, countdown: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointerUpdate {
    Npc(InstanceId),
    Location { x: u16, y: u16 },
    Relative { x: u16, y: u16 },
    Remove,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Handshake { client_id: u64, dev: bool },
    Welcome(WelcomeInfo),
    Spawn(EntityState),
    List(Vec<InstanceId>),
    Equipment(EquipmentUpdate),
    Sync(SyncInfo),
    Movement(MovementUpdate),
    Teleport { id: InstanceId, x: u16, y: u16, with_animation: bool },
    Despawn(InstanceId),
    Combat { kind: CombatOpcode, attacker: InstanceId, target: InstanceId, hit: Option<Hit> },
    Population(u32),
    Points { id: InstanceId, hit_points: u32, mana: Option<u32> },
    Network(NetworkOpcode),
    Chat(ChatInfo),
    Inventory(ContainerUpdate),
    Bank(ContainerUpdate),
    Respawn { id: InstanceId, x: u16, y: u16 },
    Notification { kind: NotificationOpcode, message: String },
    Experience(ExperienceInfo),
    Death(InstanceId),
    Quest(QuestUpdate),
    Npc(NpcUpdate),
    Pointer(PointerUpdate),
    Pvp { id: InstanceId, pvp: bool },
    Heal(HealInfo),
}

fn encode_container(packet: Packet, update: &ContainerUpdate) -> Value {
    let op = packet.as_u8();
    match update {
        ContainerUpdate::Batch(batch) => json!([op, ContainerOpcode::Batch.as_u8(), batch]),
        ContainerUpdate::Add(slot) => json!([op, ContainerOpcode::Add.as_u8(), slot]),
        ContainerUpdate::Remove(removal) => json!([op, ContainerOpcode::Remove.as_u8(), removal]),
    }
}

fn decode_container(args: &mut Args) -> Result<ContainerUpdate, ProtocolError> {
    match args.subtype(ContainerOpcode::from_u8)? {
        ContainerOpcode::Batch => Ok(ContainerUpdate::Batch(args.object()?)),
        ContainerOpcode::Add => Ok(ContainerUpdate::Add(args.object()?)),
        ContainerOpcode::Remove => Ok(ContainerUpdate::Remove(args.object()?)),
        ContainerOpcode::Select => Err(ProtocolError::UnexpectedPacket(args.packet)),
    }
}

impl ServerMessage {
    pub fn packet(&self) -> Packet {
        match self {
            Self::Handshake { .. } => Packet::Handshake,
            Self::Welcome(_) => Packet::Welcome,
            Self::Spawn(_) => Packet::Spawn,
            Self::List(_) => Packet::List,
            Self::Equipment(_) => Packet::Equipment,
            Self::Sync(_) => Packet::Sync,
            Self::Movement(_) => Packet::Movement,
            Self::Teleport { .. } => Packet::Teleport,
            Self::Despawn(_) => Packet::Despawn,
            Self::Combat { .. } => Packet::Combat,
            Self::Population(_) => Packet::Population,
            Self::Points { .. } => Packet::Points,
            Self::Network(_) => Packet::Network,
            Self::Chat(_) => Packet::Chat,
            Self::Inventory(_) => Packet::Inventory,
            Self::Bank(_) => Packet::Bank,
            Self::Respawn { .. } => Packet::Respawn,
            Self::Notification { .. } => Packet::Notification,
            Self::Experience(_) => Packet::Experience,
            Self::Death(_) => Packet::Death,
            Self::Quest(_) => Packet::Quest,
            Self::Npc(_) => Packet::Npc,
            Self::Pointer(_) => Packet::Pointer,
            Self::Pvp { .. } => Packet::Pvp,
            Self::Heal(_) => Packet::Heal,
        }
    }

    /// Builds the envelope for this message
    pub fn to_value(&self) -> Value {
        let op = self.packet().as_u8();
        match self {
            Self::Handshake { client_id, dev } => json!([op, client_id, dev]),
            Self::Welcome(info) => json!([op, info]),
            Self::Spawn(state) => json!([op, state]),
            Self::List(ids) => json!([op, ids]),
            Self::Equipment(update) => match update {
                EquipmentUpdate::Batch(items) => json!([op, EquipmentOpcode::Batch.as_u8(), items]),
                EquipmentUpdate::Equip(item) => json!([op, EquipmentOpcode::Equip.as_u8(), item]),
                EquipmentUpdate::Unequip(slot) => {
                    json!([op, EquipmentOpcode::Unequip.as_u8(), slot.as_u8()])
                }
            },
            Self::Sync(info) => json!([op, info]),
            Self::Movement(update) => match update {
                MovementUpdate::Move { id, x, y, forced, with_animation } => {
                    json!([op, MovementOpcode::Move.as_u8(), id, x, y, forced, with_animation])
                }
                MovementUpdate::Follow { id, target } => {
                    json!([op, MovementOpcode::Follow.as_u8(), id, target])
                }
                MovementUpdate::Freeze { id, state } => {
                    json!([op, MovementOpcode::Freeze.as_u8(), id, state])
                }
                MovementUpdate::Stunned { id, state } => {
                    json!([op, MovementOpcode::Stunned.as_u8(), id, state])
                }
                MovementUpdate::Stop { forced } => json!([op, MovementOpcode::Stop.as_u8(), forced]),
                MovementUpdate::Started => json!([op, MovementOpcode::Started.as_u8()]),
            },
            Self::Teleport { id, x, y, with_animation } => json!([op, id, x, y, with_animation]),
            Self::Despawn(id) => json!([op, id]),
            Self::Combat { kind, attacker, target, hit } => match hit {
                Some(hit) => json!([op, kind.as_u8(), attacker, target, hit]),
                None => json!([op, kind.as_u8(), attacker, target]),
            },
            Self::Population(count) => json!([op, count]),
            Self::Points { id, hit_points, mana } => match mana {
                Some(mana) => json!([op, id, hit_points, mana]),
                None => json!([op, id, hit_points]),
            },
            Self::Network(kind) => json!([op, kind.as_u8()]),
            Self::Chat(info) => json!([op, info]),
            Self::Inventory(update) | Self::Bank(update) => encode_container(self.packet(), update),
            Self::Respawn { id, x, y } => json!([op, id, x, y]),
            Self::Notification { kind, message } => json!([op, kind.as_u8(), message]),
            Self::Experience(info) => json!([op, info]),
            Self::Death(id) => json!([op, id]),
            Self::Quest(update) => match update {
                QuestUpdate::Batch(quests) => json!([op, QuestOpcode::Batch.as_u8(), quests]),
                QuestUpdate::Progress(progress) => {
                    json!([op, QuestOpcode::Progress.as_u8(), progress])
                }
                QuestUpdate::Finish { id } => json!([op, QuestOpcode::Finish.as_u8(), { "id": id }]),
            },
            Self::Npc(update) => match update {
                NpcUpdate::Talk(talk) => json!([op, NpcOpcode::Talk.as_u8(), talk]),
                NpcUpdate::Bank => json!([op, NpcOpcode::Bank.as_u8()]),
                NpcUpdate::Enchant => json!([op, NpcOpcode::Enchant.as_u8()]),
                NpcUpdate::Countdown { id, countdown } => json!([
                    op,
                    NpcOpcode::Countdown.as_u8(),
                    { "id": id, "countdown": countdown }
                ]),
            },
            Self::Pointer(update) => match update {
                PointerUpdate::Npc(id) => json!([op, PointerOpcode::Npc.as_u8(), id]),
                PointerUpdate::Location { x, y } => json!([op, PointerOpcode::Location.as_u8(), x, y]),
                PointerUpdate::Relative { x, y } => json!([op, PointerOpcode::Relative.as_u8(), x, y]),
                PointerUpdate::Remove => json!([op, PointerOpcode::Remove.as_u8()]),
            },
            Self::Pvp { id, pvp } => json!([op, id, pvp]),
            Self::Heal(info) => json!([op, info]),
        }
    }

    /// Parses one envelope
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let (packet, items) = open_envelope(value)?;
        let mut args = Args::new(packet, items);

        let message = match packet {
            Packet::Handshake => Self::Handshake { client_id: args.u64()?, dev: args.bool()? },
            Packet::Welcome => Self::Welcome(args.object()?),
            Packet::Spawn => Self::Spawn(args.object()?),
            Packet::List => Self::List(args.object()?),
            Packet::Equipment => Self::Equipment(match args.subtype(EquipmentOpcode::from_u8)? {
                EquipmentOpcode::Batch => EquipmentUpdate::Batch(args.object()?),
                EquipmentOpcode::Equip => EquipmentUpdate::Equip(args.object()?),
                EquipmentOpcode::Unequip => EquipmentUpdate::Unequip(args.subtype(EquipmentSlot::from_u8)?),
            }),
            Packet::Sync => Self::Sync(args.object()?),
            Packet::Movement => Self::Movement(match args.subtype(MovementOpcode::from_u8)? {
                MovementOpcode::Move => MovementUpdate::Move {
                    id: args.u64()?,
                    x: args.u16()?,
                    y: args.u16()?,
                    forced: args.bool()?,
                    with_animation: args.bool()?,
                },
                MovementOpcode::Follow => MovementUpdate::Follow { id: args.u64()?, target: args.u64()? },
                MovementOpcode::Freeze => MovementUpdate::Freeze { id: args.u64()?, state: args.bool()? },
                MovementOpcode::Stunned => MovementUpdate::Stunned { id: args.u64()?, state: args.bool()? },
                MovementOpcode::Stop => MovementUpdate::Stop { forced: args.bool()? },
                MovementOpcode::Started => MovementUpdate::Started,
            }),
            Packet::Teleport => Self::Teleport {
                id: args.u64()?,
                x: args.u16()?,
                y: args.u16()?,
                with_animation: args.bool()?,
            },
            Packet::Despawn => Self::Despawn(args.u64()?),
            Packet::Combat => Self::Combat {
                kind: args.subtype(CombatOpcode::from_u8)?,
                attacker: args.u64()?,
                target: args.u64()?,
                hit: args.opt_object()?,
            },
            Packet::Population => Self::Population(args.u32()?),
            Packet::Points => {
                let id = args.u64()?;
                let hit_points = args.u32()?;
                let mana = if args.has_more() { Some(args.u32()?) } else { None };
                Self::Points { id, hit_points, mana }
            }
            Packet::Network => Self::Network(args.subtype(NetworkOpcode::from_u8)?),
            Packet::Chat => Self::Chat(args.object()?),
            Packet::Inventory => Self::Inventory(decode_container(&mut args)?),
            Packet::Bank => Self::Bank(decode_container(&mut args)?),
            Packet::Respawn => Self::Respawn { id: args.u64()?, x: args.u16()?, y: args.u16()? },
            Packet::Notification => Self::Notification {
                kind: args.subtype(NotificationOpcode::from_u8)?,
                message: args.string()?,
            },
            Packet::Experience => Self::Experience(args.object()?),
            Packet::Death => Self::Death(args.u64()?),
            Packet::Quest => Self::Quest(match args.subtype(QuestOpcode::from_u8)? {
                QuestOpcode::Batch => QuestUpdate::Batch(args.object()?),
                QuestOpcode::Progress => QuestUpdate::Progress(args.object()?),
                QuestOpcode::Finish => {
                    let body: Value = args.object()?;
                    let id = body["id"].as_u64().and_then(|id| u32::try_from(id).ok());
                    QuestUpdate::Finish { id: id.ok_or_else(|| args.invalid())? }
                }
            }),
            Packet::Npc => Self::Npc(match args.subtype(NpcOpcode::from_u8)? {
                NpcOpcode::Talk => NpcUpdate::Talk(args.object()?),
                NpcOpcode::Bank => NpcUpdate::Bank,
                NpcOpcode::Enchant => NpcUpdate::Enchant,
                NpcOpcode::Countdown => {
                    let body: Value = args.object()?;
                    let id = body["id"].as_u64();
                    let countdown = body["countdown"].as_u64().and_then(|c| u32::try_from(c).ok());
                    match (id, countdown) {
                        (Some(id), Some(countdown)) => NpcUpdate::Countdown { id, countdown },
                        _ => return Err(args.invalid()),
                    }
                }
            }),
            Packet::Pointer => Self::Pointer(match args.subtype(PointerOpcode::from_u8)? {
                PointerOpcode::Npc => PointerUpdate::Npc(args.u64()?),
                PointerOpcode::Location => PointerUpdate::Location { x: args.u16()?, y: args.u16()? },
                PointerOpcode::Relative => PointerUpdate::Relative { x: args.u16()?, y: args.u16()? },
                PointerOpcode::Remove => PointerUpdate::Remove,
            }),
            Packet::Pvp => Self::Pvp { id: args.u64()?, pvp: args.bool()? },
            Packet::Heal => Self::Heal(args.object()?),
            Packet::Intro | Packet::Who | Packet::Ready | Packet::Request | Packet::Target => {
                return Err(ProtocolError::UnexpectedPacket(packet))
            }
        };

        Ok(message)
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notification { kind: NotificationOpcode::Text, message: message.into() }
    }
}

// =============================================================================
// Client -> Server Messages
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Intro {
        kind: IntroOpcode,
        username: String,
        password: String,
        email: Option<String>,
    },
    Who(Vec<InstanceId>),
    Unequip(EquipmentSlot),
    Ready,
    /// Click on a tile; the server decides between moving, attacking,
    /// picking up and talking
    Move { x: u16, y: u16 },
    Stop,
    Request(InstanceId),
    Attack(InstanceId),
    ClearTarget,
    Network(NetworkOpcode),
    Chat(String),
    InventorySelect(u32),
    InventoryRemove { index: u32, count: u32 },
    BankSelect { container: ContainerType, index: u32 },
    Respawn(InstanceId),
}

impl ClientMessage {
    pub fn packet(&self) -> Packet {
        match self {
            Self::Intro { .. } => Packet::Intro,
            Self::Who(_) => Packet::Who,
            Self::Unequip(_) => Packet::Equipment,
            Self::Ready => Packet::Ready,
            Self::Move { .. } | Self::Stop => Packet::Movement,
            Self::Request(_) => Packet::Request,
            Self::Attack(_) | Self::ClearTarget => Packet::Target,
            Self::Network(_) => Packet::Network,
            Self::Chat(_) => Packet::Chat,
            Self::InventorySelect(_) | Self::InventoryRemove { .. } => Packet::Inventory,
            Self::BankSelect { .. } => Packet::Bank,
            Self::Respawn(_) => Packet::Respawn,
        }
    }

    pub fn to_value(&self) -> Value {
        let op = self.packet().as_u8();
        match self {
            Self::Intro { kind, username, password, email } => match email {
                Some(email) => json!([op, kind.as_u8(), username, password, email]),
                None => json!([op, kind.as_u8(), username, password]),
            },
            Self::Who(ids) => json!([op, ids]),
            Self::Unequip(slot) => json!([op, EquipmentOpcode::Unequip.as_u8(), slot.as_u8()]),
            Self::Ready => json!([op]),
            Self::Move { x, y } => json!([op, MovementOpcode::Move.as_u8(), x, y]),
            Self::Stop => json!([op, MovementOpcode::Stop.as_u8()]),
            Self::Request(id) => json!([op, id]),
            Self::Attack(id) => json!([op, TargetOpcode::Attack.as_u8(), id]),
            Self::ClearTarget => json!([op, TargetOpcode::None.as_u8()]),
            Self::Network(kind) => json!([op, kind.as_u8()]),
            Self::Chat(text) => json!([op, text]),
            Self::InventorySelect(index) => json!([op, ContainerOpcode::Select.as_u8(), index]),
            Self::InventoryRemove { index, count } => {
                json!([op, ContainerOpcode::Remove.as_u8(), index, count])
            }
            Self::BankSelect { container, index } => {
                json!([op, ContainerOpcode::Select.as_u8(), container.as_u8(), index])
            }
            Self::Respawn(id) => json!([op, id]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let (packet, items) = open_envelope(value)?;
        let mut args = Args::new(packet, items);

        let message = match packet {
            Packet::Intro => {
                let kind = args.subtype(IntroOpcode::from_u8)?;
                let username = args.opt_string()?.unwrap_or_default();
                let password = args.opt_string()?.unwrap_or_default();
                let email = args.opt_string()?;
                Self::Intro { kind, username, password, email }
            }
            Packet::Who => Self::Who(args.object()?),
            Packet::Equipment => match args.subtype(EquipmentOpcode::from_u8)? {
                EquipmentOpcode::Unequip => Self::Unequip(args.subtype(EquipmentSlot::from_u8)?),
                _ => return Err(ProtocolError::UnexpectedPacket(packet)),
            },
            Packet::Ready => Self::Ready,
            Packet::Movement => match args.subtype(MovementOpcode::from_u8)? {
                MovementOpcode::Move => Self::Move { x: args.u16()?, y: args.u16()? },
                MovementOpcode::Stop => Self::Stop,
                _ => return Err(ProtocolError::UnexpectedPacket(packet)),
            },
            Packet::Request => Self::Request(args.u64()?),
            Packet::Target => match args.subtype(TargetOpcode::from_u8)? {
                TargetOpcode::Attack => Self::Attack(args.u64()?),
                TargetOpcode::None => Self::ClearTarget,
            },
            Packet::Network => Self::Network(args.subtype(NetworkOpcode::from_u8)?),
            Packet::Chat => Self::Chat(args.string()?),
            Packet::Inventory => match args.subtype(ContainerOpcode::from_u8)? {
                ContainerOpcode::Select => Self::InventorySelect(args.u32()?),
                ContainerOpcode::Remove => Self::InventoryRemove { index: args.u32()?, count: args.u32()? },
                _ => return Err(ProtocolError::UnexpectedPacket(packet)),
            },
            Packet::Bank => match args.subtype(ContainerOpcode::from_u8)? {
                ContainerOpcode::Select => Self::BankSelect {
                    container: args.subtype(ContainerType::from_u8)?,
                    index: args.u32()?,
                },
                _ => return Err(ProtocolError::UnexpectedPacket(packet)),
            },
            Packet::Respawn => Self::Respawn(args.u64()?),
            _ => return Err(ProtocolError::UnexpectedPacket(packet)),
        };

        Ok(message)
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }
}

// =============================================================================
// Frames
// =============================================================================

/// Reason string sent in place of a frame right before a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Ban,
    InvalidLogin,
    LoggedIn,
    Timeout,
    Full,
    Maintenance,
}

impl Notice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::InvalidLogin => "invalidlogin",
            Self::LoggedIn => "loggedin",
            Self::Timeout => "timeout",
            Self::Full => "full",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ban" => Some(Self::Ban),
            "invalidlogin" => Some(Self::InvalidLogin),
            "loggedin" => Some(Self::LoggedIn),
            "timeout" => Some(Self::Timeout),
            "full" => Some(Self::Full),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Envelopes(Vec<Value>),
    /// Bare UTF-8 string, anything that does not start with `[`
    Notice(String),
}

/// Encodes envelopes as one frame: a single envelope stays flat, several
/// become a batch. Returns `None` for an empty slice.
pub fn encode_frame(envelopes: &[Value]) -> Option<String> {
    match envelopes {
        [] => None,
        [single] => Some(single.to_string()),
        many => Some(Value::Array(many.to_vec()).to_string()),
    }
}

pub fn decode_frame(text: &str) -> Result<Frame, ProtocolError> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('[') {
        return Ok(Frame::Notice(text.to_string()));
    }

    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(ProtocolError::Malformed("frame is not an array".into()));
    };

    match items.first() {
        None => Err(ProtocolError::EmptyFrame),
        Some(Value::Array(_)) => Ok(Frame::Envelopes(items)),
        Some(Value::Number(_)) => Ok(Frame::Envelopes(vec![Value::Array(items)])),
        Some(_) => Err(ProtocolError::Malformed("frame does not start with an opcode".into())),
    }
}

// =============================================================================
// Visibility diff
// =============================================================================

/// Difference between what a client knows and what it should see
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDiff {
    /// Visible but unknown, the client has to ask for these
    pub new: Vec<InstanceId>,
    pub keep: Vec<InstanceId>,
    /// Known but no longer visible
    pub remove: Vec<InstanceId>,
}

impl ListDiff {
    /// All three lists come back sorted.
    pub fn compute(known: &HashSet<InstanceId>, visible: &HashSet<InstanceId>) -> Self {
        let mut new: Vec<_> = visible.difference(known).copied().collect();
        let mut keep: Vec<_> = visible.intersection(known).copied().collect();
        let mut remove: Vec<_> = known.difference(visible).copied().collect();
        new.sort_unstable();
        keep.sort_unstable();
        remove.sort_unstable();
        Self { new, keep, remove }
    }
}
