use super::*;
use types::U256;

// Examples from https://docs.soliditylang.org/en/v0.8.17/abi-spec.html#examples
// without the 4 byte method id.

/*
contract Foo {
    function baz(uint32 x, bool y) public pure returns (bool r) { r = x > 32 || y; }
    function sam(bytes memory, bool, uint[] memory) public pure {}
}
*/
#[test]
fn foo_baz() {
    #[derive(Serialize, Debug)]
    struct Baz(u32, bool);

    let expected = "
0000000000000000000000000000000000000000000000000000000000000045
0000000000000000000000000000000000000000000000000000000000000001
    ";
    serialize_and_compare(&Baz(69, true), expected);
}

#[test]
fn foo_baz_return() {
    serialize_and_compare_args(
        &true,
        "0000000000000000000000000000000000000000000000000000000000000001",
    );
    serialize_and_compare_args(
        &false,
        "0000000000000000000000000000000000000000000000000000000000000000",
    );
}

mod foo_sam {
    use super::*;

    const EXPECTED: &str = "
0000000000000000000000000000000000000000000000000000000000000060 // [0] (bytes) offset
0000000000000000000000000000000000000000000000000000000000000001 // [1] (bool)
00000000000000000000000000000000000000000000000000000000000000a0 // [2] (uint[]) offset
    0000000000000000000000000000000000000000000000000000000000000004 // [0] (bytes) length
    6461766500000000000000000000000000000000000000000000000000000000 // [0] (bytes)

    0000000000000000000000000000000000000000000000000000000000000003 // [2] (uint[]) length
    0000000000000000000000000000000000000000000000000000000000000001 // [2][0]
    0000000000000000000000000000000000000000000000000000000000000002 // [2][1]
    0000000000000000000000000000000000000000000000000000000000000003 // [2][2]
        ";

    #[test]
    fn via_vectors() {
        #[derive(Serialize, Debug)]
        struct Sam(#[serde(with = "as_bytes")] Vec<u8>, bool, Vec<U256>);

        let d = Sam(b"dave".to_vec(), true, vec![1.into(), 2.into(), 3.into()]);
        serialize_and_compare_args(&d, EXPECTED);
    }
}

#[test]
fn nested_dynamic_arrays() {
    /*
    g(uint256[][])
    */
    #[derive(Serialize, Debug)]
    struct Data(Vec<Vec<U256>>);

    let d = Data(vec![vec![1.into(), 2.into()], vec![3.into()]]);

    let expected = "
0000000000000000000000000000000000000000000000000000000000000020 // offset of [[1, 2], [3]]
    0000000000000000000000000000000000000000000000000000000000000002 // count for [[1, 2], [3]]
    0000000000000000000000000000000000000000000000000000000000000040 // offset of [1, 2]
    00000000000000000000000000000000000000000000000000000000000000a0 // offset of [3]
        0000000000000000000000000000000000000000000000000000000000000002 // count for [1, 2]
        0000000000000000000000000000000000000000000000000000000000000001 // encoding of 1
        0000000000000000000000000000000000000000000000000000000000000002 // encoding of 2

        0000000000000000000000000000000000000000000000000000000000000001 // count for [3]
        0000000000000000000000000000000000000000000000000000000000000003 // encoding of 3
    ";

    serialize_and_compare_args(&d, expected);
}
