//! Type-specific subrecord decoders.
//!
//! Each record type maps a handful of binary subrecords to named, typed
//! fields; those fields are the unit of snapshot diffing. Decoders are total:
//! a missing or too-short subrecord yields a missing field, never an error,
//! and unhandled subrecords are ignored.
//!
//! Offsets follow the Fallout 76 v208 layouts: WEAP DNAM (170 bytes),
//! ARMO DATA (12), ALCH ENIT (33), NPC_ ACBS (20), QUST DATA (20),
//! COBJ DNAM/FVPA, AMMO DATA (8) + DNAM (16), and so on.

use std::fmt;

use crate::esm::records::{Record, Subrecord};
use crate::strings::StringTable;

/// A decoded value. The discriminant doubles as the stored `field_kind`, so
/// diff comparisons are on the `(kind, value)` pair and can never equate,
/// say, the int 1 with the string "1".
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f32),
    Str(String),
    Bool(bool),
    FormRef(u32),
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Floats are canonicalized on construction: every NaN collapses to the
    /// canonical quiet NaN and `-0.0` to `0.0`, so the rendered text of two
    /// equal values is byte-identical and text equality is bit equality.
    pub fn float(v: f32) -> Self {
        if v.is_nan() {
            FieldValue::Float(f32::NAN)
        } else if v == 0.0 {
            FieldValue::Float(0.0)
        } else {
            FieldValue::Float(v)
        }
    }

    /// Stored `field_kind` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "str",
            FieldValue::Bool(_) => "bool",
            FieldValue::FormRef(_) => "formid",
            FieldValue::Blob(_) => "blob",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Str(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::FormRef(v) => write!(f, "0x{:08X}", v),
            FieldValue::Blob(v) => write!(f, "{}", hex::encode(v)),
        }
    }
}

/// One named field decoded from a record.
#[derive(Debug, Clone)]
pub struct DecodedField {
    pub name: String,
    pub value: FieldValue,
}

impl DecodedField {
    fn new(name: impl Into<String>, value: FieldValue) -> Self {
        DecodedField {
            name: name.into(),
            value,
        }
    }
}

/// Resolve a record's display name: FULL as a string id looked up in the
/// table, FULL as inline text, or the unresolved id rendered as hex.
pub fn resolve_full_name(rec: &Record, strings: &StringTable) -> Option<String> {
    if let Some(id) = rec.full_name_id() {
        if id == 0 {
            return None;
        }
        return Some(
            strings
                .lookup(id)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("0x{:08X}", id)),
        );
    }
    rec.full_name_inline()
}

/// Decode type-specific fields plus the universal icon/model/keyword fields.
pub fn decode_record(rec: &Record, strings: &StringTable) -> Vec<DecodedField> {
    let mut fields = match rec.kind.as_str() {
        "WEAP" => decode_weap(rec),
        "ARMO" => decode_armo(rec),
        "ALCH" => decode_alch(rec),
        "AMMO" => decode_ammo(rec),
        "NPC_" => decode_npc(rec),
        "QUST" => decode_qust(rec),
        "COBJ" => decode_cobj(rec),
        "MISC" | "BOOK" | "KEYM" => decode_value_weight(rec),
        "GMST" => decode_gmst(rec),
        "GLOB" => decode_glob(rec),
        "CONT" => decode_cont(rec),
        "FLOR" => decode_flor(rec),
        "LVLI" | "LVLN" => decode_leveled_list(rec),
        "PERK" => decode_perk(rec),
        _ => Vec::new(),
    };

    for (tag, name) in [("ICON", "icon"), ("MICO", "icon_small"), ("MODL", "model")] {
        if let Some(sub) = rec.subrecord(tag) {
            if sub.size() > 1 {
                fields.push(DecodedField::new(name, FieldValue::Str(sub.as_string())));
            }
        }
    }

    for (i, keyword) in rec.keywords().into_iter().enumerate() {
        fields.push(DecodedField::new(
            format!("keyword_{}", i),
            FieldValue::FormRef(keyword),
        ));
    }

    // DESC holds a localized string id on most item types; unresolved ids
    // keep their numeric form.
    if let Some(desc) = rec.subrecord("DESC") {
        if desc.size() == 4 {
            if let Some(id) = desc.as_u32() {
                if id != 0 {
                    let text = strings
                        .lookup(id)
                        .map(str::to_owned)
                        .unwrap_or_else(|| format!("0x{:08X}", id));
                    fields.push(DecodedField::new("description", FieldValue::Str(text)));
                }
            }
        }
    }

    fields
}

fn push_f32(fields: &mut Vec<DecodedField>, sub: &Subrecord, offset: usize, name: &str) {
    if let Some(v) = sub.read_f32(offset) {
        fields.push(DecodedField::new(name, FieldValue::float(v)));
    }
}

fn push_u32(fields: &mut Vec<DecodedField>, sub: &Subrecord, offset: usize, name: &str) {
    if let Some(v) = sub.read_u32(offset) {
        fields.push(DecodedField::new(name, FieldValue::Int(v as i64)));
    }
}

fn push_i32(fields: &mut Vec<DecodedField>, sub: &Subrecord, offset: usize, name: &str) {
    if let Some(v) = sub.read_i32(offset) {
        fields.push(DecodedField::new(name, FieldValue::Int(v as i64)));
    }
}

fn push_u16(fields: &mut Vec<DecodedField>, sub: &Subrecord, offset: usize, name: &str) {
    if let Some(v) = sub.read_u16(offset) {
        fields.push(DecodedField::new(name, FieldValue::Int(v as i64)));
    }
}

fn push_form(fields: &mut Vec<DecodedField>, sub: &Subrecord, offset: usize, name: &str) {
    if let Some(v) = sub.read_u32(offset) {
        if v != 0 {
            fields.push(DecodedField::new(name, FieldValue::FormRef(v)));
        }
    }
}

fn push_flag(fields: &mut Vec<DecodedField>, flags: u32, bit: u32, name: &str) {
    fields.push(DecodedField::new(name, FieldValue::Bool(flags & bit != 0)));
}

fn decode_weap(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(dnam) = rec.subrecord("DNAM") {
        push_f32(&mut fields, dnam, 4, "speed");
        push_f32(&mut fields, dnam, 8, "reach");
        push_f32(&mut fields, dnam, 24, "min_range");
        push_f32(&mut fields, dnam, 28, "max_range");
        push_f32(&mut fields, dnam, 32, "attack_delay");
        push_f32(&mut fields, dnam, 52, "weight");
        push_u32(&mut fields, dnam, 56, "value");
        push_f32(&mut fields, dnam, 60, "damage");
        if let Some(v) = dnam.read_u8(101) {
            fields.push(DecodedField::new(
                "num_projectiles",
                FieldValue::Int(v as i64),
            ));
        }
    }

    if let Some(crdt) = rec.subrecord("CRDT") {
        push_f32(&mut fields, crdt, 0, "crit_damage");
        push_f32(&mut fields, crdt, 4, "crit_multiplier");
    }

    // Damage type array: (form_id, value) pairs, 8 bytes each.
    if let Some(dama) = rec.subrecord("DAMA") {
        for i in 0..dama.size() / 8 {
            push_form(&mut fields, dama, i * 8, &format!("damage_type_{}_id", i));
            push_f32(&mut fields, dama, i * 8 + 4, &format!("damage_type_{}_value", i));
        }
    }

    fields
}

fn decode_armo(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(data) = rec.subrecord("DATA") {
        push_i32(&mut fields, data, 0, "value");
        push_f32(&mut fields, data, 4, "weight");
        push_u32(&mut fields, data, 8, "health");
    }
    if let Some(dnam) = rec.subrecord("DNAM") {
        push_u32(&mut fields, dnam, 0, "armor_rating");
    }
    if let Some(bod2) = rec.subrecord("BOD2") {
        push_u32(&mut fields, bod2, 0, "biped_slots");
    }

    fields
}

fn decode_alch(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(data) = rec.subrecord("DATA") {
        push_f32(&mut fields, data, 0, "weight");
    }

    if let Some(enit) = rec.subrecord("ENIT") {
        push_i32(&mut fields, enit, 0, "value");
        if let Some(flags) = enit.read_u32(4) {
            fields.push(DecodedField::new("flags", FieldValue::Int(flags as i64)));
            push_flag(&mut fields, flags, 0x0000_0002, "is_food");
            push_flag(&mut fields, flags, 0x0001_0000, "is_medicine");
            push_flag(&mut fields, flags, 0x0002_0000, "is_poison");
        }
        push_form(&mut fields, enit, 8, "addiction");
    }

    decode_effects(rec, &mut fields);
    fields
}

/// EFID/EFIT pairs shared by ALCH and similar effect carriers.
fn decode_effects(rec: &Record, fields: &mut Vec<DecodedField>) {
    let efids: Vec<&Subrecord> = rec.subrecords_of("EFID").collect();
    let efits: Vec<&Subrecord> = rec.subrecords_of("EFIT").collect();
    for (i, (efid, efit)) in efids.iter().zip(efits.iter()).enumerate() {
        push_form(fields, efid, 0, &format!("effect_{}_id", i));
        push_f32(fields, efit, 0, &format!("effect_{}_magnitude", i));
        push_u32(fields, efit, 4, &format!("effect_{}_area", i));
        push_u32(fields, efit, 8, &format!("effect_{}_duration", i));
    }
}

fn decode_ammo(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(data) = rec.subrecord("DATA") {
        push_i32(&mut fields, data, 0, "projectile_count");
        push_f32(&mut fields, data, 4, "weight");
    }
    if let Some(dnam) = rec.subrecord("DNAM") {
        push_form(&mut fields, dnam, 0, "projectile");
        if let Some(flags) = dnam.read_u32(4) {
            fields.push(DecodedField::new("flags", FieldValue::Int(flags as i64)));
        }
        push_f32(&mut fields, dnam, 8, "speed");
    }

    fields
}

fn decode_npc(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(acbs) = rec.subrecord("ACBS") {
        if let Some(flags) = acbs.read_u32(0) {
            fields.push(DecodedField::new("flags", FieldValue::Int(flags as i64)));
            push_flag(&mut fields, flags, 0x0000_0002, "is_essential");
            push_flag(&mut fields, flags, 0x0000_0004, "is_unique");
            push_flag(&mut fields, flags, 0x0000_0800, "is_protected");
        }
        push_u16(&mut fields, acbs, 4, "magicka_offset");
        push_u16(&mut fields, acbs, 6, "stamina_offset");
        push_u16(&mut fields, acbs, 8, "level");
        push_u16(&mut fields, acbs, 14, "health_offset");
    }
    if let Some(rnam) = rec.subrecord("RNAM") {
        push_form(&mut fields, rnam, 0, "race");
    }

    fields
}

fn decode_qust(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(data) = rec.subrecord("DATA") {
        if let Some(flags) = data.read_u32(0) {
            fields.push(DecodedField::new("flags", FieldValue::Int(flags as i64)));
            push_flag(&mut fields, flags, 0x0001, "start_game_enabled");
        }
        push_u32(&mut fields, data, 4, "priority");
        push_u32(&mut fields, data, 8, "quest_type");
    }

    fields
}

fn decode_cobj(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(cnam) = rec.subrecord("CNAM") {
        push_form(&mut fields, cnam, 0, "created_object");
    }
    if let Some(bnam) = rec.subrecord("BNAM") {
        push_form(&mut fields, bnam, 0, "workbench_keyword");
    }
    if let Some(dnam) = rec.subrecord("DNAM") {
        push_u32(&mut fields, dnam, 4, "created_count");
    }
    // Component requirements: (form_id, count) pairs, 8 bytes each.
    if let Some(fvpa) = rec.subrecord("FVPA") {
        for i in 0..fvpa.size() / 8 {
            push_form(&mut fields, fvpa, i * 8, &format!("component_{}_id", i));
            push_u32(&mut fields, fvpa, i * 8 + 4, &format!("component_{}_count", i));
        }
    }

    fields
}

fn decode_value_weight(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();
    if let Some(data) = rec.subrecord("DATA") {
        push_i32(&mut fields, data, 0, "value");
        push_f32(&mut fields, data, 4, "weight");
    }
    fields
}

fn decode_gmst(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();
    let Some(data) = rec.subrecord("DATA") else {
        return fields;
    };
    let edid = rec.editor_id().unwrap_or_default();

    // Game setting type is encoded in the first character of the editor id.
    match edid.chars().next() {
        Some('f') => push_f32(&mut fields, data, 0, "value"),
        Some('i') | Some('u') => push_i32(&mut fields, data, 0, "value"),
        Some('s') => fields.push(DecodedField::new("value", FieldValue::Str(data.as_string()))),
        Some('b') => {
            if let Some(v) = data.read_u32(0) {
                fields.push(DecodedField::new("value", FieldValue::Bool(v != 0)));
            }
        }
        _ => {}
    }
    fields
}

fn decode_glob(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(fnam) = rec.subrecord("FNAM") {
        if let Some(code) = fnam.read_u8(0) {
            let name = match code {
                0x73 => "short".to_string(),
                0x6C => "long".to_string(),
                0x66 => "float".to_string(),
                other => format!("0x{:02X}", other),
            };
            fields.push(DecodedField::new("type", FieldValue::Str(name)));
        }
    }
    if let Some(fltv) = rec.subrecord("FLTV") {
        push_f32(&mut fields, fltv, 0, "value");
    }

    fields
}

fn decode_cont(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();
    for (i, cnto) in rec.subrecords_of("CNTO").enumerate() {
        push_form(&mut fields, cnto, 0, &format!("item_{}_id", i));
        push_i32(&mut fields, cnto, 4, &format!("item_{}_count", i));
    }
    fields
}

fn decode_flor(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();
    if let Some(pfig) = rec.subrecord("PFIG") {
        push_form(&mut fields, pfig, 0, "harvest_ingredient");
    }
    fields
}

fn decode_leveled_list(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(lvld) = rec.subrecord("LVLD") {
        if let Some(v) = lvld.read_u8(0) {
            fields.push(DecodedField::new("chance_none", FieldValue::Int(v as i64)));
        }
    }
    if let Some(lvlf) = rec.subrecord("LVLF") {
        if let Some(flags) = lvlf.read_u8(0) {
            fields.push(DecodedField::new("flags", FieldValue::Int(flags as i64)));
            fields.push(DecodedField::new(
                "use_all",
                FieldValue::Bool(flags & 0x04 != 0),
            ));
        }
    }
    if let Some(llct) = rec.subrecord("LLCT") {
        if let Some(v) = llct.read_u8(0) {
            fields.push(DecodedField::new("entry_count", FieldValue::Int(v as i64)));
        }
    }
    for (i, lvlo) in rec.subrecords_of("LVLO").enumerate() {
        push_u16(&mut fields, lvlo, 0, &format!("entry_{}_level", i));
        push_form(&mut fields, lvlo, 4, &format!("entry_{}_ref", i));
        push_u16(&mut fields, lvlo, 8, &format!("entry_{}_count", i));
    }

    fields
}

fn decode_perk(rec: &Record) -> Vec<DecodedField> {
    let mut fields = Vec::new();

    if let Some(data) = rec.subrecord("DATA") {
        if let Some(v) = data.read_u8(0) {
            fields.push(DecodedField::new("is_playable", FieldValue::Bool(v != 0)));
        }
        if let Some(v) = data.read_u8(2) {
            fields.push(DecodedField::new("level", FieldValue::Int(v as i64)));
        }
        if let Some(v) = data.read_u8(3) {
            fields.push(DecodedField::new("num_ranks", FieldValue::Int(v as i64)));
        }
        if let Some(v) = data.read_u8(4) {
            fields.push(DecodedField::new("hidden", FieldValue::Bool(v != 0)));
        }
    }
    if let Some(nnam) = rec.subrecord("NNAM") {
        push_form(&mut fields, nnam, 0, "next_perk");
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esm::records::{Record, Subrecord};

    fn rec(kind: &str, subs: Vec<(&str, Vec<u8>)>) -> Record {
        Record {
            kind: kind.into(),
            form_id: 0x100,
            flags: 0,
            revision: 0,
            version: 208,
            subrecords: subs
                .into_iter()
                .map(|(tag, data)| Subrecord {
                    tag: tag.into(),
                    data,
                })
                .collect(),
            data: Vec::new(),
        }
    }

    fn field<'a>(fields: &'a [DecodedField], name: &str) -> &'a FieldValue {
        &fields
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("missing field {}", name))
            .value
    }

    #[test]
    fn test_weap_dnam() {
        let mut dnam = vec![0u8; 170];
        dnam[4..8].copy_from_slice(&1.0f32.to_le_bytes()); // speed
        dnam[52..56].copy_from_slice(&3.5f32.to_le_bytes()); // weight
        dnam[56..60].copy_from_slice(&25u32.to_le_bytes()); // value
        dnam[60..64].copy_from_slice(&50.0f32.to_le_bytes()); // damage
        dnam[101] = 2; // num_projectiles

        let fields = decode_record(&rec("WEAP", vec![("DNAM", dnam)]), &StringTable::new());
        assert_eq!(*field(&fields, "damage"), FieldValue::Float(50.0));
        assert_eq!(*field(&fields, "speed"), FieldValue::Float(1.0));
        assert_eq!(*field(&fields, "weight"), FieldValue::Float(3.5));
        assert_eq!(*field(&fields, "value"), FieldValue::Int(25));
        assert_eq!(*field(&fields, "num_projectiles"), FieldValue::Int(2));
    }

    #[test]
    fn test_short_payload_yields_missing_fields() {
        // An 8-byte DNAM carries speed but nothing at the damage offset.
        let mut dnam = vec![0u8; 8];
        dnam[4..8].copy_from_slice(&2.0f32.to_le_bytes());
        let fields = decode_record(&rec("WEAP", vec![("DNAM", dnam)]), &StringTable::new());
        assert_eq!(*field(&fields, "speed"), FieldValue::Float(2.0));
        assert!(fields.iter().all(|f| f.name != "damage"));
    }

    #[test]
    fn test_npc_flags_and_level() {
        let mut acbs = vec![0u8; 20];
        acbs[0..4].copy_from_slice(&0x0000_0002u32.to_le_bytes()); // essential
        acbs[8..10].copy_from_slice(&10u16.to_le_bytes()); // level

        let fields = decode_record(&rec("NPC_", vec![("ACBS", acbs)]), &StringTable::new());
        assert_eq!(*field(&fields, "level"), FieldValue::Int(10));
        assert_eq!(*field(&fields, "is_essential"), FieldValue::Bool(true));
        assert_eq!(*field(&fields, "is_unique"), FieldValue::Bool(false));
    }

    #[test]
    fn test_gmst_typed_by_editor_id() {
        let float_rec = rec(
            "GMST",
            vec![
                ("EDID", b"fJumpHeight\0".to_vec()),
                ("DATA", 76.0f32.to_le_bytes().to_vec()),
            ],
        );
        let fields = decode_record(&float_rec, &StringTable::new());
        assert_eq!(*field(&fields, "value"), FieldValue::Float(76.0));

        let bool_rec = rec(
            "GMST",
            vec![
                ("EDID", b"bAllowRun\0".to_vec()),
                ("DATA", 1u32.to_le_bytes().to_vec()),
            ],
        );
        let fields = decode_record(&bool_rec, &StringTable::new());
        assert_eq!(*field(&fields, "value"), FieldValue::Bool(true));

        let str_rec = rec(
            "GMST",
            vec![
                ("EDID", b"sMainMenu\0".to_vec()),
                ("DATA", b"Start\0".to_vec()),
            ],
        );
        let fields = decode_record(&str_rec, &StringTable::new());
        assert_eq!(*field(&fields, "value"), FieldValue::Str("Start".into()));
    }

    #[test]
    fn test_cobj_components() {
        let mut fvpa = Vec::new();
        fvpa.extend(0x0001_0001u32.to_le_bytes());
        fvpa.extend(3u32.to_le_bytes());
        fvpa.extend(0x0001_0002u32.to_le_bytes());
        fvpa.extend(7u32.to_le_bytes());

        let fields = decode_record(
            &rec(
                "COBJ",
                vec![
                    ("CNAM", 0x00AB_CDEFu32.to_le_bytes().to_vec()),
                    ("FVPA", fvpa),
                ],
            ),
            &StringTable::new(),
        );
        assert_eq!(
            *field(&fields, "created_object"),
            FieldValue::FormRef(0x00AB_CDEF)
        );
        assert_eq!(
            *field(&fields, "component_1_id"),
            FieldValue::FormRef(0x0001_0002)
        );
        assert_eq!(*field(&fields, "component_1_count"), FieldValue::Int(7));
    }

    #[test]
    fn test_unknown_kind_still_gets_universal_fields() {
        let fields = decode_record(
            &rec(
                "XYZW",
                vec![
                    ("MODL", b"meshes/test.nif\0".to_vec()),
                    ("KWDA", 0x0055_0001u32.to_le_bytes().to_vec()),
                ],
            ),
            &StringTable::new(),
        );
        assert_eq!(
            *field(&fields, "model"),
            FieldValue::Str("meshes/test.nif".into())
        );
        assert_eq!(
            *field(&fields, "keyword_0"),
            FieldValue::FormRef(0x0055_0001)
        );
    }

    #[test]
    fn test_float_canonicalization() {
        let neg_zero = FieldValue::float(-0.0);
        assert_eq!(neg_zero.to_string(), "0");

        let nan1 = FieldValue::float(f32::from_bits(0x7FC0_0001));
        let nan2 = FieldValue::float(f32::NAN);
        assert_eq!(nan1.to_string(), nan2.to_string());
    }

    #[test]
    fn test_float_display_round_trips_bits() {
        for v in [50.0f32, 0.1, 1.5e-5, 123456.78, f32::MAX] {
            let shown = FieldValue::float(v).to_string();
            assert_eq!(shown.parse::<f32>().unwrap().to_bits(), v.to_bits());
        }
    }
}
