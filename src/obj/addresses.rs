use crate::{
    obj::{FunctionEntry, OverlayAddressRecord, SectionType},
    util::map::{LinkMap, SEGMENT_PREFIX},
};

/// Collects one record per overlay segment in map order. `.bss` twins are not
/// separate overlays.
pub fn extract_overlay_addresses(map: &LinkMap) -> Vec<OverlayAddressRecord> {
    map.segments
        .iter()
        .filter(|s| s.is_overlay())
        .map(|s| OverlayAddressRecord {
            name: s.name.strip_prefix(SEGMENT_PREFIX).unwrap_or(&s.name).to_string(),
            vrom_start: s.vrom,
            vram_start: s.vram,
        })
        .collect()
}

/// Collects every symbol of every `.text` unit, in segment, unit and symbol order.
///
/// Addresses aliased across segments are kept as separate rows.
pub fn extract_function_table(map: &LinkMap) -> Vec<FunctionEntry> {
    map.units()
        .filter(|(_, unit)| unit.section_type() == Some(SectionType::Text))
        .flat_map(|(_, unit)| unit.symbols.iter())
        .map(|symbol| FunctionEntry { vram: symbol.vram, name: symbol.name.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::map::parse_map;

    const MAP: &str = "\
..boot 0x80000460 0x100 load address 0x1060
 .text 0x80000460 0x40 build/src/boot/boot_main.o
                0x80000460                bootclear
 .data 0x800004a0 0x10 build/src/boot/boot_main.o
                0x800004a0                D_800004A0
..code 0x80010000 0x40 load address 0xA87B0
 .text 0x80010000 0x40 build/src/code/z_actor.o
                0x80010000                Actor_Init
                0x80010020                func_80010020
..ovl_title 0x80800000 0x200 load address 0xB9DAB0
 .text 0x80800000 0x100 build/src/overlays/gamestates/ovl_title/z_title.o
                0x80800000                ConsoleLogo_Main
..ovl_title.bss 0x80800200 0x10
 .bss 0x80800200 0x10 build/src/overlays/gamestates/ovl_title/z_title.o
..ovl_select 0x80800000 0x100 load address 0xB9DCB0
..code.alias 0x80010000 0x40 load address 0xA87B0
 .text 0x80010000 0x40 build/src/code/z_actor.o
                0x80010000                Actor_Init
";

    #[test]
    fn test_overlay_addresses() {
        let map = parse_map(MAP).unwrap();
        assert_eq!(extract_overlay_addresses(&map), [
            OverlayAddressRecord {
                name: "ovl_title".to_string(),
                vrom_start: 0xB9DAB0,
                vram_start: 0x80800000
            },
            OverlayAddressRecord {
                name: "ovl_select".to_string(),
                vrom_start: 0xB9DCB0,
                vram_start: 0x80800000
            },
        ]);
    }

    #[test]
    fn test_function_table() {
        let map = parse_map(MAP).unwrap();
        let table = extract_function_table(&map);
        let functions: Vec<(u32, &str)> =
            table.iter().map(|f| (f.vram, f.name.as_str())).collect();
        let names: Vec<&str> = functions.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, [
            "bootclear",
            "Actor_Init",
            "func_80010020",
            "ConsoleLogo_Main",
            "Actor_Init"
        ]);
        // The alias segment repeats the address; duplicates are kept
        assert_eq!(functions.iter().filter(|(vram, _)| *vram == 0x80010000).count(), 2);
    }
}
