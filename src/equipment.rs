//! Equipment addressing: identities, wildcard filters, and the routing keys
//! built from them.
//!
//! Canonical textual form is dotted `TYPE.SSS.NNN`. Sector is restricted to
//! `1..=999`; the token `000` is reserved to mean "no sector", so the three
//! sector states (wildcard, absent, concrete) round-trip through disjoint
//! tokens.

use std::fmt;

use crate::error::MalformedKey;

/// Sector values below this are reserved; `0` means "absent" on the wire.
const NO_SECTOR_TOKEN: &str = "000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EquipmentType {
    Mpu,
    Crn,
    Mlg,
    Sch,
    Tst,
    Sbo,
    Omp,
}

impl EquipmentType {
    const ALL: [EquipmentType; 7] = [
        EquipmentType::Mpu,
        EquipmentType::Crn,
        EquipmentType::Mlg,
        EquipmentType::Sch,
        EquipmentType::Tst,
        EquipmentType::Sbo,
        EquipmentType::Omp,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            EquipmentType::Mpu => "MPU",
            EquipmentType::Crn => "CRN",
            EquipmentType::Mlg => "MLG",
            EquipmentType::Sch => "SCH",
            EquipmentType::Tst => "TST",
            EquipmentType::Sbo => "SBO",
            EquipmentType::Omp => "OMP",
        }
    }

    fn parse(token: &str) -> Result<Self, MalformedKey> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == token)
            .ok_or_else(|| MalformedKey(format!("unknown equipment type {token:?}")))
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(type, sector, serial)`. `type` and `serial` are always present; `sector`
/// may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EquipmentId {
    pub ty: EquipmentType,
    pub sector: Option<u16>,
    pub serial: u16,
}

impl EquipmentId {
    pub fn new(ty: EquipmentType, sector: Option<u16>, serial: u16) -> Self {
        Self { ty, sector, serial }
    }

    fn format_tokens(&self) -> [String; 3] {
        [
            self.ty.to_string(),
            format_sector(self.sector),
            format!("{:03}", self.serial),
        ]
    }

    fn parse_tokens(tokens: [&str; 3]) -> Result<Self, MalformedKey> {
        let ty = EquipmentType::parse(tokens[0])?;
        let sector = parse_sector(tokens[1])?;
        let serial = parse_number(tokens[2])?;
        Ok(Self { ty, sector, serial })
    }

    /// Parse the bare three-token canonical form `TYPE.SSS.NNN` (as opposed
    /// to a six-token routing key).
    pub fn parse(text: &str) -> Result<Self, MalformedKey> {
        let tokens: [&str; 3] = text
            .split('.')
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|tokens: Vec<&str>| {
                MalformedKey(format!("expected 3 tokens, got {}", tokens.len()))
            })?;
        Self::parse_tokens(tokens)
    }

    /// Does this concrete id satisfy `filter`?
    pub fn matches(&self, filter: &EquipmentFilter) -> bool {
        filter.matches(self)
    }
}

impl fmt::Display for EquipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.format_tokens();
        write!(f, "{a}.{b}.{c}")
    }
}

fn format_sector(sector: Option<u16>) -> String {
    match sector {
        None => NO_SECTOR_TOKEN.to_string(),
        Some(n) => format!("{n:03}"),
    }
}

fn parse_sector(token: &str) -> Result<Option<u16>, MalformedKey> {
    if token == NO_SECTOR_TOKEN {
        return Ok(None);
    }
    let n = parse_number(token)?;
    if n == 0 {
        return Err(MalformedKey(format!(
            "sector token {token:?} is reserved for 'absent', use 000"
        )));
    }
    Ok(Some(n))
}

fn parse_number(token: &str) -> Result<u16, MalformedKey> {
    token
        .parse()
        .map_err(|_| MalformedKey(format!("not a number: {token:?}")))
}

/// A field that is either a wildcard or a concrete value `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field<T> {
    Wildcard,
    Value(T),
}

impl<T: PartialEq> Field<T> {
    fn matches(&self, value: &T) -> bool {
        match self {
            Field::Wildcard => true,
            Field::Value(v) => v == value,
        }
    }
}

pub type TypeFilter = Field<EquipmentType>;
/// `Value(None)` matches only an explicitly-absent sector; `Wildcard`
/// matches both absent and any concrete sector.
pub type SectorFilter = Field<Option<u16>>;
pub type SerialFilter = Field<u16>;

/// Same shape as [`EquipmentId`] but each field may be a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EquipmentFilter {
    pub ty: TypeFilter,
    pub sector: SectorFilter,
    pub serial: SerialFilter,
}

impl EquipmentFilter {
    pub fn all() -> Self {
        Self {
            ty: Field::Wildcard,
            sector: Field::Wildcard,
            serial: Field::Wildcard,
        }
    }

    /// Alias of [`Self::all`].
    pub fn any() -> Self {
        Self::all()
    }

    pub fn exact(id: EquipmentId) -> Self {
        Self {
            ty: Field::Value(id.ty),
            sector: Field::Value(id.sector),
            serial: Field::Value(id.serial),
        }
    }

    pub fn matches(&self, id: &EquipmentId) -> bool {
        self.ty.matches(&id.ty) && self.sector.matches(&id.sector) && self.serial.matches(&id.serial)
    }

    fn format_tokens(&self) -> [String; 3] {
        [
            match &self.ty {
                Field::Wildcard => "*".to_string(),
                Field::Value(ty) => ty.to_string(),
            },
            match &self.sector {
                Field::Wildcard => "*".to_string(),
                Field::Value(sector) => format_sector(*sector),
            },
            match &self.serial {
                Field::Wildcard => "*".to_string(),
                Field::Value(serial) => format!("{serial:03}"),
            },
        ]
    }

    fn parse_tokens(tokens: [&str; 3]) -> Result<Self, MalformedKey> {
        let ty = if tokens[0] == "*" {
            Field::Wildcard
        } else {
            Field::Value(EquipmentType::parse(tokens[0])?)
        };
        let sector = if tokens[1] == "*" {
            Field::Wildcard
        } else {
            Field::Value(parse_sector(tokens[1])?)
        };
        let serial = if tokens[2] == "*" {
            Field::Wildcard
        } else {
            Field::Value(parse_number(tokens[2])?)
        };
        Ok(Self { ty, sector, serial })
    }
}

impl fmt::Display for EquipmentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.format_tokens();
        write!(f, "{a}.{b}.{c}")
    }
}

fn split_six(wire: &str) -> Result<[&str; 6], MalformedKey> {
    let tokens: Vec<&str> = wire.split('.').collect();
    tokens
        .try_into()
        .map_err(|tokens: Vec<&str>| MalformedKey(format!("expected 6 tokens, got {}", tokens.len())))
}

/// `(source: EquipmentId, target: EquipmentFilter)`. The shape of every
/// publish-side routing key, and of every routing key as actually observed
/// on delivery (a publisher always names itself concretely; its target may
/// be wildcarded for a broadcast).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicationRoutingKey {
    pub source: EquipmentId,
    pub target: EquipmentFilter,
}

impl PublicationRoutingKey {
    pub fn new(source: EquipmentId, target: EquipmentFilter) -> Self {
        Self { source, target }
    }

    pub fn format(&self) -> String {
        let [a, b, c] = self.source.format_tokens();
        let [d, e, f] = self.target.format_tokens();
        format!("{a}.{b}.{c}.{d}.{e}.{f}")
    }

    pub fn parse(wire: &str) -> Result<Self, MalformedKey> {
        let tokens = split_six(wire)?;
        let source = EquipmentId::parse_tokens([tokens[0], tokens[1], tokens[2]])?;
        let target = EquipmentFilter::parse_tokens([tokens[3], tokens[4], tokens[5]])?;
        Ok(Self { source, target })
    }
}

impl fmt::Display for PublicationRoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// `(source: EquipmentFilter, target: EquipmentFilter)`. Used when binding a
/// queue; both sides may be wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionRoutingKey {
    pub source: EquipmentFilter,
    pub target: EquipmentFilter,
}

impl SubscriptionRoutingKey {
    pub fn new(source: EquipmentFilter, target: EquipmentFilter) -> Self {
        Self { source, target }
    }

    pub fn format(&self) -> String {
        let [a, b, c] = self.source.format_tokens();
        let [d, e, f] = self.target.format_tokens();
        format!("{a}.{b}.{c}.{d}.{e}.{f}")
    }

    pub fn parse(wire: &str) -> Result<Self, MalformedKey> {
        let tokens = split_six(wire)?;
        let source = EquipmentFilter::parse_tokens([tokens[0], tokens[1], tokens[2]])?;
        let target = EquipmentFilter::parse_tokens([tokens[3], tokens[4], tokens[5]])?;
        Ok(Self { source, target })
    }
}

impl fmt::Display for SubscriptionRoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_type() -> impl Strategy<Value = EquipmentType> {
        prop_oneof![
            Just(EquipmentType::Mpu),
            Just(EquipmentType::Crn),
            Just(EquipmentType::Mlg),
            Just(EquipmentType::Sch),
            Just(EquipmentType::Tst),
            Just(EquipmentType::Sbo),
            Just(EquipmentType::Omp),
        ]
    }

    fn arb_id() -> impl Strategy<Value = EquipmentId> {
        (arb_type(), prop::option::of(1u16..=999), 0u16..=999)
            .prop_map(|(ty, sector, serial)| EquipmentId::new(ty, sector, serial))
    }

    #[test]
    fn format_uses_reserved_sector_sentinel() {
        let id = EquipmentId::new(EquipmentType::Crn, None, 1);
        assert_eq!(id.to_string(), "CRN.000.001");
    }

    #[test]
    fn publication_key_round_trips_a_broadcast() {
        let key = PublicationRoutingKey::new(
            EquipmentId::new(EquipmentType::Crn, None, 1),
            EquipmentFilter::all(),
        );
        assert_eq!(key.format(), "CRN.000.001.*.*.*");
        assert_eq!(PublicationRoutingKey::parse(&key.format()).unwrap(), key);
    }

    #[test]
    fn all_matches_every_id() {
        let filter = EquipmentFilter::all();
        let id = EquipmentId::new(EquipmentType::Sbo, Some(1), 2);
        assert!(filter.matches(&id));
    }

    #[test]
    fn wildcard_sector_matches_absent_and_concrete() {
        let filter = EquipmentFilter {
            ty: Field::Value(EquipmentType::Omp),
            sector: Field::Wildcard,
            serial: Field::Wildcard,
        };
        assert!(filter.matches(&EquipmentId::new(EquipmentType::Omp, None, 1)));
        assert!(filter.matches(&EquipmentId::new(EquipmentType::Omp, Some(7), 1)));
    }

    #[test]
    fn explicit_absent_sector_filter_rejects_concrete_sector() {
        let filter = EquipmentFilter {
            ty: Field::Wildcard,
            sector: Field::Value(None),
            serial: Field::Wildcard,
        };
        assert!(filter.matches(&EquipmentId::new(EquipmentType::Omp, None, 1)));
        assert!(!filter.matches(&EquipmentId::new(EquipmentType::Omp, Some(1), 1)));
    }

    #[test]
    fn sector_zero_token_is_rejected_on_parse() {
        assert!(EquipmentId::parse_tokens(["CRN", "000", "001"]).is_ok());
        assert!(parse_sector("000").unwrap().is_none());
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(PublicationRoutingKey::parse("CRN.000.001.*.*").is_err());
        assert!(PublicationRoutingKey::parse("XYZ.000.001.*.*.*").is_err());
    }

    proptest! {
        #[test]
        fn publication_round_trip(id in arb_id()) {
            let key = PublicationRoutingKey::new(id, EquipmentFilter::all());
            prop_assert_eq!(PublicationRoutingKey::parse(&key.format()).unwrap(), key);
        }

        #[test]
        fn all_matches_arbitrary_id(id in arb_id()) {
            prop_assert!(EquipmentFilter::all().matches(&id));
        }

        #[test]
        fn exact_filter_matches_only_itself(id in arb_id(), other in arb_id()) {
            let filter = EquipmentFilter::exact(id);
            prop_assert_eq!(filter.matches(&other), id == other);
        }
    }
}
