extern crate std;

use super::*;
use crate::cmpl::*;
use crate::db::*;
use crate::hwrm::*;
use crate::tx::*;
use core::convert::TryFrom;
use zerocopy::FromBytes;

#[test]
fn page_table_entry_flags() {
    assert_eq!(pte(0x1000, 0, 1), 0x1000 | PTU_PTE_VALID | PTU_PTE_LAST);
    assert_eq!(pte(0x1000, 0, 3), 0x1000 | PTU_PTE_VALID);
    assert_eq!(pte(0x2000, 1, 3), 0x2000 | PTU_PTE_VALID | PTU_PTE_NEXT_TO_LAST);
    assert_eq!(pte(0x3000, 2, 3), 0x3000 | PTU_PTE_VALID | PTU_PTE_LAST);
}

#[test]
fn valid_bit_polarity_flips_on_wrap() {
    let cp_bit = 256;
    assert!(cmp_valid(1, 0, cp_bit));
    assert!(cmp_valid(1, 255, cp_bit));
    assert!(!cmp_valid(0, 255, cp_bit));
    // second pass expects the bit cleared
    assert!(!cmp_valid(1, 256, cp_bit));
    assert!(cmp_valid(0, 300, cp_bit));
    // third pass is back to the first polarity
    assert!(cmp_valid(1, 512, cp_bit));
}

#[test]
fn completion_types_and_sizes() {
    assert_eq!(CmplType::try_from(0x11u8).unwrap(), CmplType::RxL2);
    assert_eq!(CmplType::try_from(0x30u8).unwrap(), CmplType::CqNotification);
    assert!(CmplType::try_from(0x3fu8).is_err());
    assert!(CmplType::RxTpaEnd.is_32b());
    assert!(!CmplType::RxAgg.is_32b());
    assert!(!CmplType::TxL2.is_32b());
    assert_eq!(CmplType::raw(0xffff_ff13), 0x13);
}

#[test]
fn doorbell_key_fields() {
    let key = db_key64(DBR_TYPE_SQ, 0x1234);
    assert_eq!(db_type64(key), DBR_TYPE_SQ);
    assert_eq!(db_xid64(key), 0x1234);
    assert_ne!(key & DBR_VALID, 0);
    assert_ne!(key & DBR_PATH_L2, 0);

    let arm = db_key64_with_type(key, DBR_TYPE_CQ_ARMALL);
    assert_eq!(db_type64(arm), DBR_TYPE_CQ_ARMALL);
    assert_eq!(db_xid64(arm), 0x1234);
    assert_eq!(db_index64(arm | 0x1ff_ffff), 0xff_ffff);
}

#[test]
fn chip_generations() {
    assert_eq!(ChipKind::from_chip_num(CHIP_NUM_57414), ChipKind::P4);
    assert_eq!(ChipKind::from_chip_num(CHIP_NUM_57508), ChipKind::P5);
    assert_eq!(ChipKind::from_chip_num(CHIP_NUM_57608), ChipKind::P7);
    assert!(ChipKind::P7.is_p5_plus() && ChipKind::P7.is_p7());
    assert!(!ChipKind::P4.is_p5_plus());
    assert!(is_vf_device(0x16dc));
    assert!(!is_vf_device(0x16d7));
}

#[test]
fn tx_bd_accessors() {
    let flags = TX_BD_TYPE_LONG_TX_BD | TX_BD_FLAGS_PACKET_END | (3 << TX_BD_FLAGS_BD_CNT_SHIFT);
    let bd = TxBd::new(flags | (1514 << TX_BD_LEN_SHIFT), 0xabcd, 0x1000);
    assert_eq!(bd.bd_type(), TX_BD_TYPE_LONG_TX_BD);
    assert_eq!(bd.len(), 1514);
    assert_eq!(bd.bd_count(), 3);
    assert!(bd.is_packet_end());

    assert_eq!(length_hint(64), TX_BD_FLAGS_LHINT_512_AND_SMALLER);
    assert_eq!(length_hint(600), TX_BD_FLAGS_LHINT_512_TO_1023);
    assert_eq!(length_hint(1500), TX_BD_FLAGS_LHINT_1024_TO_2047);
    assert_eq!(length_hint(9000), TX_BD_FLAGS_LHINT_2048_AND_LARGER);
}

#[test]
fn hwrm_response_parses_from_raw_bytes() {
    let mut raw = [0u8; 40];
    raw[0..2].copy_from_slice(&0u16.to_le_bytes());
    raw[2..4].copy_from_slice(&HWRM_VER_GET.to_le_bytes());
    raw[4..6].copy_from_slice(&7u16.to_le_bytes());
    raw[6..8].copy_from_slice(&40u16.to_le_bytes());
    raw[20..22].copy_from_slice(&CHIP_NUM_57508.to_le_bytes());
    raw[39] = HWRM_RESP_VALID_KEY;
    let resp = VerGetOutput::read_from(&raw[..]).unwrap();
    assert_eq!(resp.hdr.seq_id.get(), 7);
    assert_eq!(resp.hdr.resp_len.get(), 40);
    assert_eq!(resp.chip_num.get(), CHIP_NUM_57508);
    assert_eq!(resp.valid, HWRM_RESP_VALID_KEY);
    assert_eq!(<VerGetInput as HwrmMessage>::REQ_TYPE, HWRM_VER_GET);
}
