//! The rule set wiring Quark's hooks into vanilla game classes.
//!
//! Every rule calls a static method on [`HOOKS_OWNER`]. Method names are given
//! in both their deobfuscated and SRG forms so the rules work in development
//! and in production environments.

use crate::hooks::HookSymbol;
use crate::insn::{InsnId, InsnList};
use crate::insn_list;
use crate::nodes::MethodDefinition;
use crate::opcodes::{INVOKESTATIC, INVOKEVIRTUAL, RETURN};
use crate::pipeline::PatchRule;
use crate::registry::RegistryBuilder;
use crate::scan::{combine, invokes, ldc_int, opcode_is, whole_method, InsnFilter, MethodAction};
use crate::signature::MethodSignature;
use crate::stack::{self, Step};

pub const HOOKS_OWNER: &str = "vazkii/quark/base/asm/ASMHooks";

/// Present when OptiFine is installed; it rewrites some of the same methods.
pub const OPTIFINE_MARKER: &str = "optifine/OptiFineTweaker";

const fn hook(name: &'static str, descriptor: &'static str) -> HookSymbol {
    HookSymbol::new(HOOKS_OWNER, name, descriptor)
}

const UPDATE_EMOTES: HookSymbol = hook("updateEmotes", "(Lnet/minecraft/entity/Entity;)V");
const SET_RUNE_TARGET_STACK: HookSymbol =
    hook("setColorRuneTargetStack", "(Lnet/minecraft/item/ItemStack;)V");
const SET_RUNE_TARGET_ENTITY: HookSymbol = hook(
    "setColorRuneTargetStack",
    "(Lnet/minecraft/entity/EntityLivingBase;Lnet/minecraft/inventory/EntityEquipmentSlot;)V",
);
const GET_RUNE_COLOR: HookSymbol = hook("getRuneColor", "(I)I");
const APPLY_RUNE_COLOR: HookSymbol = hook("applyRuneColor", "()V");
const DROP_BOAT_BANNER: HookSymbol =
    hook("dropBoatBanner", "(Lnet/minecraft/entity/item/EntityBoat;)V");
const ON_BOAT_UPDATE: HookSymbol = hook("onBoatUpdate", "(Lnet/minecraft/entity/item/EntityBoat;)V");
const RENDER_BANNER_ON_BOAT: HookSymbol =
    hook("renderBannerOnBoat", "(Lnet/minecraft/entity/item/EntityBoat;F)V");
const SHOULD_PISTON_MOVE_TE: HookSymbol =
    hook("shouldPistonMoveTE", "(ZLnet/minecraft/block/state/IBlockState;)Z");
const ON_PISTON_MOVE: HookSymbol = hook(
    "onPistonMove",
    "(Lnet/minecraft/world/World;Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/block/state/BlockPistonStructureHelper;Lnet/minecraft/util/EnumFacing;Z)V",
);
const ON_PISTON_UPDATE: HookSymbol =
    hook("onPistonUpdate", "(Lnet/minecraft/tileentity/TileEntityPiston;)V");
const SET_PISTON_BLOCK: HookSymbol = hook(
    "setPistonBlock",
    "(Lnet/minecraft/world/World;Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/block/state/IBlockState;I)Z",
);
const RENDER_PISTON_BLOCK: HookSymbol = hook(
    "renderPistonBlock",
    "(Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/block/state/IBlockState;Lnet/minecraft/client/renderer/BufferBuilder;Lnet/minecraft/world/World;Z)Z",
);
const IS_EVERYONE_ASLEEP: HookSymbol = hook("isEveryoneAsleep", "(Lnet/minecraft/world/World;)I");
const PUT_COLORS_FLAT: HookSymbol = hook(
    "putColorsFlat",
    "(Lnet/minecraft/world/IBlockAccess;Lnet/minecraft/block/state/IBlockState;Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/client/renderer/BufferBuilder;Lnet/minecraft/client/renderer/block/model/BakedQuad;I)V",
);
const SHIFT_LAYER_COUNT: HookSymbol = hook("shiftLayerCount", "(I)I");
const RENDER_FIRE: HookSymbol = hook("renderFire", "(Lnet/minecraft/entity/Entity;DDDF)Z");

const RUNE_GLINT_COLOR: i32 = -8372020;

/// Whether an edit stops after the first site or patches all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shots {
    First,
    Every,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Before,
    After,
    Replace,
}

fn at_sites<F, G>(filter: F, placement: Placement, shots: Shots, fragment: G) -> MethodAction
where
    F: InsnFilter + Send + Sync + 'static,
    G: Fn() -> InsnList + Send + Sync + 'static,
{
    combine(filter, move |method: &mut MethodDefinition, id: InsnId| {
        let list = fragment();
        match placement {
            Placement::Before => method.instructions.insert_before(id, list),
            Placement::After => method.instructions.insert(id, list),
            Placement::Replace => method.instructions.replace(id, list),
        };
        shots == Shots::First
    })
}

fn preamble<G>(fragment: G) -> MethodAction
where
    G: Fn() -> InsnList + Send + Sync + 'static,
{
    whole_method(move |method: &mut MethodDefinition| {
        method.instructions.insert_at_start(fragment());
        true
    })
}

/// Throws the old body away, handlers and debug ranges included.
fn replace_body<G>(fragment: G) -> MethodAction
where
    G: Fn() -> InsnList + Send + Sync + 'static,
{
    whole_method(move |method: &mut MethodDefinition| {
        method.instructions.replace_all(fragment());
        method.try_catch_blocks.clear();
        method.local_variables.clear();
        true
    })
}

/// Registers every rule.
pub fn register_all(builder: &mut RegistryBuilder) {
    emotes(builder);
    color_runes(builder);
    boat_sails(builder);
    piston_block_breakers(builder);
    better_craft_shifting(builder);
    pistons_move_tile_entities(builder);
    improved_sleeping(builder);
    colored_lights(builder);
    more_banner_layers(builder);
    better_fire_effect(builder);
}

fn emotes(builder: &mut RegistryBuilder) {
    builder.register(
        "net.minecraft.client.model.ModelBiped",
        PatchRule::new(
            MethodSignature::new(
                "setRotationAngles",
                "func_78087_a",
                "(FFFFFFLnet/minecraft/entity/Entity;)V",
            ),
            at_sites(opcode_is(RETURN), Placement::Before, Shots::First, || {
                insn_list! {
                    [var ALOAD 7]
                    [call UPDATE_EMOTES]
                }
            }),
        ),
    );
}

fn color_runes(builder: &mut RegistryBuilder) {
    builder
        .register(
            "net.minecraft.client.renderer.RenderItem",
            PatchRule::new(
                MethodSignature::new(
                    "renderItem",
                    "func_180454_a",
                    "(Lnet/minecraft/item/ItemStack;Lnet/minecraft/client/renderer/block/model/IBakedModel;)V",
                ),
                preamble(|| {
                    insn_list! {
                        [var ALOAD 1]
                        [call SET_RUNE_TARGET_STACK]
                    }
                }),
            ),
        )
        .register(
            "net.minecraft.client.renderer.RenderItem",
            PatchRule::new(
                MethodSignature::new(
                    "renderEffect",
                    "func_191966_a",
                    "(Lnet/minecraft/client/renderer/block/model/IBakedModel;)V",
                ),
                at_sites(ldc_int(RUNE_GLINT_COLOR), Placement::After, Shots::Every, || {
                    insn_list! {
                        [call GET_RUNE_COLOR]
                    }
                }),
            ),
        );

    builder
        .register(
            "net.minecraft.client.renderer.entity.layers.LayerArmorBase",
            PatchRule::new(
                MethodSignature::new(
                    "renderArmorLayer",
                    "func_188361_a",
                    "(Lnet/minecraft/entity/EntityLivingBase;FFFFFFFLnet/minecraft/inventory/EntityEquipmentSlot;)V",
                ),
                preamble(|| {
                    insn_list! {
                        [var ALOAD 1]
                        [var ALOAD 9]
                        [call SET_RUNE_TARGET_ENTITY]
                    }
                }),
            ),
        )
        .register(
            "net.minecraft.client.renderer.entity.layers.LayerArmorBase",
            PatchRule::new(
                MethodSignature::new(
                    "renderEnchantedGlint",
                    "func_188364_a",
                    "(Lnet/minecraft/client/renderer/entity/RenderLivingBase;Lnet/minecraft/entity/EntityLivingBase;Lnet/minecraft/client/model/ModelBase;FFFFFFF)V",
                ),
                at_sites(
                    invokes(INVOKESTATIC, MethodSignature::named("color", "(FFFF)V")),
                    Placement::After,
                    Shots::Every,
                    || {
                        insn_list! {
                            [call APPLY_RUNE_COLOR]
                        }
                    },
                ),
            )
            .unless_present(OPTIFINE_MARKER),
        );
}

fn boat_sails(builder: &mut RegistryBuilder) {
    builder.register(
        "net.minecraft.client.renderer.entity.RenderBoat",
        PatchRule::new(
            MethodSignature::new(
                "doRender",
                "func_188300_b",
                "(Lnet/minecraft/entity/item/EntityBoat;DDDFF)V",
            ),
            at_sites(
                invokes(
                    INVOKEVIRTUAL,
                    MethodSignature::new(
                        "render",
                        "func_78088_a",
                        "(Lnet/minecraft/entity/Entity;FFFFFF)V",
                    ),
                ),
                Placement::After,
                Shots::First,
                || {
                    insn_list! {
                        [var ALOAD 1]
                        [var FLOAD 9]
                        [call RENDER_BANNER_ON_BOAT]
                    }
                },
            ),
        ),
    );

    builder
        .register(
            "net.minecraft.entity.item.EntityBoat",
            PatchRule::new(
                MethodSignature::new(
                    "attackEntityFrom",
                    "func_70097_a",
                    "(Lnet/minecraft/util/DamageSource;F)Z",
                ),
                at_sites(
                    invokes(
                        INVOKEVIRTUAL,
                        MethodSignature::new(
                            "dropItemWithOffset",
                            "func_145778_a",
                            "(Lnet/minecraft/item/Item;IF)Lnet/minecraft/entity/item/EntityItem;",
                        ),
                    ),
                    Placement::After,
                    Shots::First,
                    || {
                        insn_list! {
                            [var ALOAD 0]
                            [call DROP_BOAT_BANNER]
                        }
                    },
                ),
            ),
        )
        .register(
            "net.minecraft.entity.item.EntityBoat",
            PatchRule::new(
                MethodSignature::new("onUpdate", "func_70071_h_", "()V"),
                preamble(|| {
                    insn_list! {
                        [var ALOAD 0]
                        [call ON_BOAT_UPDATE]
                    }
                }),
            ),
        );
}

fn piston_block_breakers(builder: &mut RegistryBuilder) {
    builder
        .register(
            "net.minecraft.block.BlockPistonBase",
            PatchRule::new(
                MethodSignature::new(
                    "canPush",
                    "func_185646_a",
                    "(Lnet/minecraft/block/state/IBlockState;Lnet/minecraft/world/World;Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/util/EnumFacing;ZLnet/minecraft/util/EnumFacing;)Z",
                ),
                at_sites(
                    invokes(
                        INVOKEVIRTUAL,
                        MethodSignature::named(
                            "hasTileEntity",
                            "(Lnet/minecraft/block/state/IBlockState;)Z",
                        ),
                    ),
                    Placement::After,
                    Shots::First,
                    || {
                        insn_list! {
                            [var ALOAD 0]
                            [call SHOULD_PISTON_MOVE_TE]
                        }
                    },
                ),
            ),
        )
        .register(
            "net.minecraft.block.BlockPistonBase",
            PatchRule::new(
                MethodSignature::new(
                    "doMove",
                    "func_176319_a",
                    "(Lnet/minecraft/world/World;Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/util/EnumFacing;Z)Z",
                ),
                at_sites(
                    invokes(
                        INVOKEVIRTUAL,
                        MethodSignature::new("canMove", "func_177253_a", "()Z"),
                    ),
                    Placement::After,
                    Shots::First,
                    || {
                        insn_list! {
                            [var ALOAD 1]
                            [var ALOAD 2]
                            [var ALOAD 5]
                            [var ALOAD 3]
                            [var ILOAD 4]
                            [call ON_PISTON_MOVE]
                        }
                    },
                ),
            ),
        );
}

/// `mergeItemStack(stack, start, end, reverse)` gets both slot bounds rewritten
/// from the original pair, keeping `reverse` on top.
fn transfer_stack_in_slot(min_hook: &'static str, max_hook: &'static str) -> PatchRule {
    let min = hook(min_hook, "(II)I");
    let max = hook(max_hook, "(II)I");
    PatchRule::new(
        MethodSignature::new(
            "transferStackInSlot",
            "func_82846_b",
            "(Lnet/minecraft/entity/player/EntityPlayer;I)Lnet/minecraft/item/ItemStack;",
        ),
        at_sites(
            invokes(
                INVOKEVIRTUAL,
                MethodSignature::new(
                    "mergeItemStack",
                    "func_75135_a",
                    "(Lnet/minecraft/item/ItemStack;IIZ)Z",
                ),
            ),
            Placement::Before,
            Shots::Every,
            move || {
                let steps: Vec<Step<_>> = stack::pair_beneath_top(min.invoke(), max.invoke());
                stack::assemble(steps)
            },
        ),
    )
}

fn better_craft_shifting(builder: &mut RegistryBuilder) {
    builder
        .register(
            "net.minecraft.inventory.ContainerWorkbench",
            transfer_stack_in_slot(
                "getMinInventoryBoundaryCrafting",
                "getMaxInventoryBoundaryCrafting",
            ),
        )
        .register(
            "net.minecraft.inventory.ContainerMerchant",
            transfer_stack_in_slot(
                "getMinInventoryBoundaryVillager",
                "getMaxInventoryBoundaryVillager",
            ),
        );
}

fn pistons_move_tile_entities(builder: &mut RegistryBuilder) {
    let update = MethodSignature::new("update", "func_73660_a", "()V");
    let set_block_state = || {
        at_sites(
            invokes(
                INVOKEVIRTUAL,
                MethodSignature::new(
                    "setBlockState",
                    "func_180501_a",
                    "(Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/block/state/IBlockState;I)Z",
                ),
            ),
            Placement::Replace,
            Shots::First,
            || {
                insn_list! {
                    [call SET_PISTON_BLOCK]
                }
            },
        )
    };

    builder
        .register(
            "net.minecraft.tileentity.TileEntityPiston",
            PatchRule::new(
                update.clone(),
                preamble(|| {
                    insn_list! {
                        [var ALOAD 0]
                        [call ON_PISTON_UPDATE]
                    }
                }),
            ),
        )
        .register(
            "net.minecraft.tileentity.TileEntityPiston",
            PatchRule::new(
                MethodSignature::new("clearPistonTileEntity", "func_145866_f", "()V"),
                set_block_state(),
            ),
        )
        .register(
            "net.minecraft.tileentity.TileEntityPiston",
            PatchRule::new(update, set_block_state()),
        );

    builder.register(
        "net.minecraft.client.renderer.tileentity.TileEntityPistonRenderer",
        PatchRule::new(
            MethodSignature::new(
                "renderStateModel",
                "func_188186_a",
                "(Lnet/minecraft/util/math/BlockPos;Lnet/minecraft/block/state/IBlockState;Lnet/minecraft/client/renderer/BufferBuilder;Lnet/minecraft/world/World;Z)Z",
            ),
            replace_body(|| {
                insn_list! {
                    [var ALOAD 1]
                    [var ALOAD 2]
                    [var ALOAD 3]
                    [var ALOAD 4]
                    [var ILOAD 5]
                    [call RENDER_PISTON_BLOCK]
                    [IRETURN]
                }
            }),
        ),
    );
}

/// The hook answers 0 to defer to vanilla, otherwise the verdict plus one.
fn sleep_preamble() -> InsnList {
    insn_list! {
        let vanilla;
        [var ALOAD 0]
        [call IS_EVERYONE_ASLEEP]
        [DUP]
        [jump IFEQ vanilla]
        [ICONST_1]
        [ISUB]
        [IRETURN]
        [label vanilla]
        [POP]
    }
}

fn improved_sleeping(builder: &mut RegistryBuilder) {
    builder.register(
        "net.minecraft.world.WorldServer",
        PatchRule::new(
            MethodSignature::new("areAllPlayersAsleep", "func_73056_e", "()Z"),
            preamble(sleep_preamble),
        ),
    );
}

fn colored_lights(builder: &mut RegistryBuilder) {
    builder.register(
        "net.minecraft.client.renderer.BlockModelRenderer",
        PatchRule::new(
            MethodSignature::new(
                "renderQuadsFlat",
                "func_187496_a",
                "(Lnet/minecraft/world/IBlockAccess;Lnet/minecraft/block/state/IBlockState;Lnet/minecraft/util/math/BlockPos;IZLnet/minecraft/client/renderer/BufferBuilder;Ljava/util/List;Ljava/util/BitSet;)V",
            ),
            at_sites(
                invokes(
                    INVOKEVIRTUAL,
                    MethodSignature::new("putPosition", "func_178987_a", "(DDD)V"),
                ),
                Placement::Before,
                Shots::First,
                || {
                    insn_list! {
                        [var ALOAD 1]
                        [var ALOAD 2]
                        [var ALOAD 3]
                        [var ALOAD 6]
                        [var ALOAD 18]
                        [var ILOAD 4]
                        [call PUT_COLORS_FLAT]
                    }
                },
            ),
        )
        .unless_present(OPTIFINE_MARKER),
    );
}

fn layer_count() -> MethodAction {
    at_sites(
        invokes(
            INVOKESTATIC,
            MethodSignature::new(
                "getPatterns",
                "func_175113_c",
                "(Lnet/minecraft/item/ItemStack;)I",
            ),
        ),
        Placement::After,
        Shots::First,
        || {
            insn_list! {
                [call SHIFT_LAYER_COUNT]
            }
        },
    )
}

fn more_banner_layers(builder: &mut RegistryBuilder) {
    builder
        .register(
            "net.minecraft.item.crafting.RecipesBanners$RecipeAddPattern",
            PatchRule::new(
                MethodSignature::new(
                    "matches",
                    "func_77569_a",
                    "(Lnet/minecraft/inventory/InventoryCrafting;Lnet/minecraft/world/World;)Z",
                ),
                layer_count(),
            ),
        )
        .register(
            "net.minecraft.item.ItemBanner",
            PatchRule::new(
                MethodSignature::new(
                    "appendHoverTextFromTileEntityTag",
                    "func_185054_a",
                    "(Lnet/minecraft/item/ItemStack;Ljava/util/List;)V",
                ),
                layer_count(),
            ),
        );
}

fn better_fire_effect(builder: &mut RegistryBuilder) {
    builder.register(
        "net.minecraft.client.renderer.entity.Render",
        PatchRule::new(
            MethodSignature::new(
                "renderEntityOnFire",
                "func_76977_a",
                "(Lnet/minecraft/entity/Entity;DDDF)V",
            ),
            preamble(|| {
                insn_list! {
                    let vanilla;
                    [var ALOAD 1]
                    [var DLOAD 2]
                    [var DLOAD 4]
                    [var DLOAD 6]
                    [var FLOAD 8]
                    [call RENDER_FIRE]
                    [jump IFEQ vanilla]
                    [RETURN]
                    [label vanilla]
                }
            }),
        ),
    );
}
